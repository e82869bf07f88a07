use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::admin::config::AdminConfig;
use crate::admin::controller::SysController;
use crate::admin::rpc::{AdminRequest, AdminResponse};
use crate::admin::tcp;
use crate::error::Result;
use crate::util::{now_ms, Shutdown};

pub struct Server {
    listener: TcpListener,
    config: AdminConfig,
}

impl Server {
    pub async fn bind(config: AdminConfig) -> Result<Self> {
        let address = SocketAddr::new(config.ip, config.port);
        let listener = TcpListener::bind(address).await?;
        Ok(Server { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, ctrl: Arc<SysController>, shutdown: Shutdown) -> Result<()> {
        tracing::info!(address = %self.local_addr()?, "starting admin");
        let tx = shutdown.sender();
        let (in_tx, out_rx) = tokio::sync::mpsc::unbounded_channel();
        let (task, tcp_receiver) =
            tcp::receive_task(self.listener, in_tx, tx.subscribe()).remote_handle();
        tokio::spawn(task);

        let (task, handle_messages) =
            handle_messages(ctrl.clone(), out_rx, tx.subscribe()).remote_handle();
        tokio::spawn(task);

        let control = ctrl.clone();
        let (task, control_loop) = tick_loop(
            "control",
            self.config.schedule_interval_ms,
            tx.subscribe(),
            move |now| control.control_tick(now).map(|_| ()),
        )
        .remote_handle();
        tokio::spawn(task);

        let clean = ctrl.clone();
        let (task, clean_loop) = tick_loop(
            "clean_at_delete",
            self.config.clean_interval_ms,
            tx.subscribe(),
            move |now| clean.clean_tick(now),
        )
        .remote_handle();
        tokio::spawn(task);

        let (task, nouse_loop) = tick_loop(
            "nouse_topic",
            self.config.nouse_interval_ms,
            tx.subscribe(),
            move |now| ctrl.nouse_tick(now),
        )
        .remote_handle();
        tokio::spawn(task);

        let _ = tokio::try_join!(
            tcp_receiver,
            handle_messages,
            control_loop,
            clean_loop,
            nouse_loop
        )?;
        Ok(())
    }
}

/// Runs controller work on the blocking pool; registry calls block.
async fn handle_messages(
    ctrl: Arc<SysController>,
    mut out_rx: UnboundedReceiver<(AdminRequest, oneshot::Sender<AdminResponse>)>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,

            Some((msg, cb)) = out_rx.recv() => {
                let ctrl = ctrl.clone();
                tokio::spawn(async move {
                    match tokio::task::spawn_blocking(move || ctrl.handle_request(msg, now_ms())).await {
                        Ok(res) => {
                            if cb.send(res).is_err() {
                                tracing::debug!("peer went away before the response");
                            }
                        }
                        Err(err) => tracing::error!(%err, "request handler panicked"),
                    }
                });
            }
        }
    }

    Ok(())
}

async fn tick_loop<F>(
    name: &'static str,
    period_ms: u64,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
    tick: F,
) -> Result<()>
where
    F: Fn(i64) -> Result<()> + Send + Sync + 'static,
{
    let tick = Arc::new(tick);
    let mut interval = tokio::time::interval(Duration::from_millis(period_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,

            _ = interval.tick() => {
                let tick = tick.clone();
                if let Err(err) = tokio::task::spawn_blocking(move || tick(now_ms())).await? {
                    tracing::warn!(task = name, %err, "tick failed");
                }
            }
        }
    }

    tracing::info!(task = name, "tick loop stopped");
    Ok(())
}
