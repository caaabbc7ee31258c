//! Observer-facing HTTP server.
//!
//! `GET /monitor` upgrades to a websocket that receives every published
//! snapshot, starting with the latest one. `GET /api/stats` reads the
//! registry directly, independent of the publish cadence.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use log::{debug, info};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use warp::Filter;
use warp::ws::{Message, WebSocket, Ws};

use crate::aggregator::HostRegistry;
use crate::sink::ChannelSink;

fn with_registry(
    registry: Arc<HostRegistry>,
) -> impl Filter<Extract = (Arc<HostRegistry>,), Error = Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

fn with_sink(sink: ChannelSink) -> impl Filter<Extract = (ChannelSink,), Error = Infallible> + Clone {
    warp::any().map(move || sink.clone())
}

pub fn routes(
    registry: Arc<HostRegistry>,
    sink: ChannelSink,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let monitor = warp::path("monitor")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_sink(sink))
        .map(|ws: Ws, sink: ChannelSink| ws.on_upgrade(move |socket| observe(socket, sink)));

    let stats = warp::path!("api" / "stats")
        .and(warp::get())
        .and(with_registry(registry))
        .map(|registry: Arc<HostRegistry>| warp::reply::json(&registry.snapshot()));

    monitor.or(stats)
}

async fn observe(socket: WebSocket, sink: ChannelSink) {
    let (mut outgoing, mut incoming) = socket.split();
    // Subscribe before sending the retained message so nothing published in between is lost.
    let mut updates = sink.subscribe();
    debug!("observer connected ({} total)", sink.observer_count());

    if let Some(latest) = sink.latest() {
        if outgoing.send(Message::text(latest.to_string())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(message) => {
                    if let Err(e) = outgoing.send(Message::text(message.to_string())).await {
                        debug!("observer send failed: {e}");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!("observer lagged, skipped {skipped} updates"),
                Err(RecvError::Closed) => break,
            },
            message = incoming.next() => match message {
                Some(Ok(message)) if message.is_close() => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("observer connection error: {e}");
                    break;
                }
                None => break,
            },
        }
    }

    let _ = outgoing.close().await;
    debug!("observer disconnected");
}

/// Binds the observer routes on `addr`. The returned future serves until `cancel` fires.
pub fn bind(
    addr: SocketAddr,
    registry: Arc<HostRegistry>,
    sink: ChannelSink,
    cancel: CancellationToken,
) -> Result<(SocketAddr, impl Future<Output = ()> + Send + 'static), warp::Error> {
    let (bound, server) = warp::serve(routes(registry, sink))
        .try_bind_with_graceful_shutdown(addr, async move { cancel.cancelled().await })?;

    info!("observer server listening on {bound}");
    Ok((bound, server))
}
