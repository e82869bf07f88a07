use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio_serde::formats::SymmetricalJson;
use tokio_serde::SymmetricallyFramed;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::admin::rpc::{AdminRequest, AdminResponse};
use crate::error::{Result, SluiceError};

pub type RequestTx = UnboundedSender<(AdminRequest, oneshot::Sender<AdminResponse>)>;

pub async fn receive_task(
    listener: TcpListener,
    in_tx: RequestTx,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,

            Ok((s, addr)) = listener.accept() => {
                tracing::debug!(?addr, "peer connected");
                let peer_in_tx = in_tx.clone();
                tokio::spawn(async move {
                    match stream_messages(s, peer_in_tx).await {
                        Ok(()) => tracing::debug!(?addr, "peer disconnected"),
                        Err(err) => tracing::error!(?addr, %err, "error reading from peer"),
                    }
                });
            }
        }
    }

    tracing::info!("receive complete");
    Ok(())
}

/// Answers length-delimited JSON requests one at a time, in order.
async fn stream_messages(mut stream: TcpStream, in_tx: RequestTx) -> Result<()> {
    let (r, w) = stream.split();
    let mut stream_in = SymmetricallyFramed::new(
        FramedRead::new(r, LengthDelimitedCodec::new()),
        SymmetricalJson::<AdminRequest>::default(),
    );
    let mut stream_out = SymmetricallyFramed::new(
        FramedWrite::new(w, LengthDelimitedCodec::new()),
        SymmetricalJson::<AdminResponse>::default(),
    );

    while let Some(request) = stream_in.try_next().await? {
        tracing::trace!(?request, "receive message");
        let (cb_tx, cb_rx) = oneshot::channel();
        in_tx
            .send((request, cb_tx))
            .map_err(|e| SluiceError::Internal(format!("request channel closed: {:?}", e)))?;
        let response = cb_rx
            .await
            .map_err(|e| SluiceError::Internal(format!("response dropped: {:?}", e)))?;
        stream_out.send(response).await?;
    }
    Ok(())
}
