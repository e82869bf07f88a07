use std::collections::HashMap;

use futures::SinkExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_serde::formats::Json;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::admin::master::LeaderInfo;
use crate::admin::rpc::{AdminRequest, AdminResponse, ResponseBody, TopicPatch, TopicSpec};
use crate::admin::state::worker::Heartbeat;
use crate::error::{Result, SluiceError};

type Transport = tokio_serde::Framed<
    Framed<TcpStream, LengthDelimitedCodec>,
    AdminResponse,
    AdminRequest,
    Json<AdminResponse, AdminRequest>,
>;

/// A connection to one admin replica. Requests are answered in order.
pub struct AdminClient {
    transport: Transport,
}

impl AdminClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let socket = TcpStream::connect(addr).await?;
        let transport = tokio_serde::Framed::new(
            Framed::new(socket, LengthDelimitedCodec::new()),
            Json::default(),
        );
        Ok(Self { transport })
    }

    /// Sends a request and waits for its response, errors included.
    pub async fn request(&mut self, request: AdminRequest) -> Result<AdminResponse> {
        self.transport.send(request).await?;
        self.transport
            .try_next()
            .await?
            .ok_or_else(|| SluiceError::Internal("connection closed by admin".to_string()))
    }

    pub async fn create_topic(&mut self, spec: TopicSpec) -> Result<AdminResponse> {
        self.request(AdminRequest::CreateTopic(spec)).await
    }

    pub async fn delete_topic(&mut self, name: &str, delete_data: bool) -> Result<AdminResponse> {
        self.request(AdminRequest::DeleteTopic {
            name: name.to_string(),
            delete_data,
        })
        .await
    }

    pub async fn modify_topic(&mut self, patch: TopicPatch) -> Result<AdminResponse> {
        self.request(AdminRequest::ModifyTopic(patch)).await
    }

    pub async fn topic_info(&mut self, name: &str) -> Result<AdminResponse> {
        self.request(AdminRequest::GetTopicInfo {
            name: name.to_string(),
        })
        .await
    }

    pub async fn heartbeat(&mut self, heartbeat: Heartbeat) -> Result<AdminResponse> {
        self.request(AdminRequest::Heartbeat(heartbeat)).await
    }

    pub async fn transfer_partition(&mut self, ratios: HashMap<String, u32>) -> Result<AdminResponse> {
        self.request(AdminRequest::TransferPartition { ratios }).await
    }

    pub async fn leader_info(&mut self) -> Result<Option<LeaderInfo>> {
        let response = self.request(AdminRequest::GetLeaderInfo).await?;
        match response.body {
            ResponseBody::Leader(leader) => Ok(leader),
            _ => Err(SluiceError::Internal(response.error.message)),
        }
    }
}
