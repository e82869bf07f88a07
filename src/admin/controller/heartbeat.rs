use std::collections::HashMap;

use crate::admin::controller::SysController;
use crate::admin::rpc::{Assignment, ResponseBody, WorkerStatusView, WorkerSummary};
use crate::admin::state::worker::{Heartbeat, RoleType};
use crate::admin::worker_table::FULL_RESOURCE_RATIO;
use crate::error::{Result, SluiceError};

impl SysController {
    /// Merges a worker heartbeat and answers a broker with the partitions
    /// currently targeted at it.
    pub fn heartbeat(&self, heartbeat: Heartbeat, now_ms: i64) -> Result<ResponseBody> {
        self.ensure_master()?;
        let role = heartbeat.addr.role.clone();
        let role_type = heartbeat.role_type;
        let status = self.state.workers.update_worker(heartbeat, now_ms);
        tracing::trace!(%role, %status, "heartbeat");
        if role_type == RoleType::Admin {
            return Ok(ResponseBody::Empty);
        }

        let mut assignments: Vec<Assignment> = self
            .state
            .topics
            .snapshot()
            .into_iter()
            .flat_map(|info| {
                let sealed = info.meta.sealed;
                info.partitions
                    .into_iter()
                    .filter(|p| p.target.as_ref().map_or(false, |t| t.role == role))
                    .map(move |p| Assignment {
                        id: p.id,
                        version: p.version,
                        sealed,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        assignments.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(ResponseBody::Assignments(assignments))
    }

    /// Sets per-broker resource ratios in percent. Lowering a ratio drains
    /// partitions off the broker on the next scheduling pass.
    pub fn transfer_partition(&self, ratios: HashMap<String, u32>) -> Result<ResponseBody> {
        self.ensure_master()?;
        if let Some((role, ratio)) = ratios.iter().find(|(_, r)| **r > FULL_RESOURCE_RATIO) {
            return Err(SluiceError::InvalidParameter(format!(
                "resource ratio {} of [{}] exceeds {}",
                ratio, role, FULL_RESOURCE_RATIO
            )));
        }
        tracing::info!(?ratios, "adjusting worker resources");
        self.state.workers.adjust_worker_resource(ratios);
        Ok(ResponseBody::Empty)
    }

    pub fn worker_status(&self, now_ms: i64) -> Result<ResponseBody> {
        self.ensure_master()?;
        let workers = &self.state.workers;
        Ok(ResponseBody::Workers(WorkerStatusView {
            brokers: workers.brokers().into_iter().map(WorkerSummary::from).collect(),
            admins: workers.admins().into_iter().map(WorkerSummary::from).collect(),
            error_brokers: workers.find_error_brokers(
                now_ms,
                self.config.commit_delay_threshold_ms,
                self.config.broker_check_timeout_ms,
            ),
            resource_ratios: workers.resource_ratios(),
            versions: workers.versions(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::rpc::{AdminRequest, TopicPatch, TopicSpec};
    use crate::admin::test::{elect, new_controller};
    use crate::error::ErrorCode;

    fn assignments(body: ResponseBody) -> Vec<Assignment> {
        match body {
            ResponseBody::Assignments(a) => a,
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn heartbeat_returns_targets() -> Result<()> {
        let (_, _, ctrl) = new_controller();
        elect(&ctrl);
        ctrl.create_topic(TopicSpec::new("t1", 3), 1_000)?;
        let hb = Heartbeat::broker("b1", "h:1", "default");
        assert!(assignments(ctrl.heartbeat(hb.clone(), 1_000)?).is_empty());

        ctrl.control_tick(1_100)?;
        let assigned = assignments(ctrl.heartbeat(hb, 1_200)?);
        assert_eq!(3, assigned.len());
        assert!(assigned.iter().all(|a| !a.sealed && a.version.part_version == 1));
        assert_eq!(0, assigned[0].id.idx);
        Ok(())
    }

    #[test]
    fn sealed_topic_is_flagged() -> Result<()> {
        let (_, _, ctrl) = new_controller();
        elect(&ctrl);
        ctrl.create_topic(TopicSpec::new("t1", 1), 1_000)?;
        let hb = Heartbeat::broker("b1", "h:1", "default");
        ctrl.heartbeat(hb.clone(), 1_000)?;
        ctrl.control_tick(1_100)?;
        let mut seal = TopicPatch::new("t1");
        seal.sealed = Some(true);
        ctrl.modify_topic(seal, 1_200)?;
        assert!(assignments(ctrl.heartbeat(hb, 1_300)?)[0].sealed);
        Ok(())
    }

    #[test]
    fn heartbeat_needs_master() {
        let (_, _, ctrl) = new_controller();
        let res = ctrl.handle_request(
            AdminRequest::Heartbeat(Heartbeat::broker("b1", "h:1", "default")),
            0,
        );
        assert_eq!(ErrorCode::NotLeader, res.code());
    }

    #[test]
    fn drain_moves_partitions() -> Result<()> {
        let (_, _, ctrl) = new_controller();
        elect(&ctrl);
        ctrl.create_topic(TopicSpec::new("t1", 2), 1_000)?;
        ctrl.heartbeat(Heartbeat::broker("b1", "h:1", "default"), 1_000)?;
        ctrl.control_tick(1_100)?;

        let res = ctrl.handle_request(
            AdminRequest::TransferPartition {
                ratios: HashMap::from([("b1".to_string(), 150)]),
            },
            1_200,
        );
        assert_eq!(ErrorCode::InvalidParameter, res.code());

        ctrl.transfer_partition(HashMap::from([("b1".to_string(), 0)]))?;
        ctrl.heartbeat(Heartbeat::broker("b2", "h:2", "default"), 1_200)?;
        ctrl.heartbeat(Heartbeat::broker("b1", "h:1", "default"), 1_200)?;
        ctrl.control_tick(1_300)?;
        for p in ctrl.state().topics.find("t1").unwrap().partitions {
            assert_eq!("b2", p.target.unwrap().role);
        }
        Ok(())
    }

    #[test]
    fn worker_status_lists_everyone() -> Result<()> {
        let (_, _, ctrl) = new_controller();
        elect(&ctrl);
        ctrl.heartbeat(Heartbeat::broker("b1", "h:1", "default"), 1_000)?;
        match ctrl.worker_status(1_000)? {
            ResponseBody::Workers(view) => {
                assert_eq!(1, view.brokers.len());
                assert_eq!(1, view.admins.len());
                assert!(view.error_brokers.is_empty());
            }
            other => panic!("unexpected body {:?}", other),
        }
        Ok(())
    }
}
