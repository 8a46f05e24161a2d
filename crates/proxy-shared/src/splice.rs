//! Bidirectional byte splicing for CONNECT tunnels.
//!
//! Each direction runs on its own task so that a stall in one direction
//! (e.g. the browser has nothing more to send) never blocks the other. When
//! either direction finishes - cleanly or with an error - we shut down both
//! write halves so the peer on the other side observes EOF instead of
//! hanging forever.

use std::io;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

#[derive(Debug, Default)]
pub struct SpliceStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

/// Splices `a` <-> `b` until either direction hits EOF or an error, then
/// shuts down both directions.
pub async fn splice(
    mut a_read: BoxedReader,
    mut a_write: BoxedWriter,
    mut b_read: BoxedReader,
    mut b_write: BoxedWriter,
) -> io::Result<SpliceStats> {
    let a_to_b = async { tokio::io::copy(&mut a_read, &mut b_write).await };
    let b_to_a = async { tokio::io::copy(&mut b_read, &mut a_write).await };
    tokio::pin!(a_to_b);
    tokio::pin!(b_to_a);

    let (a_to_b_result, b_to_a_result) = tokio::select! {
        r = &mut a_to_b => {
            let _ = shutdown_writer(&mut b_write).await;
            (r, b_to_a.await)
        }
        r = &mut b_to_a => {
            let _ = shutdown_writer(&mut a_write).await;
            (a_to_b.await, r)
        }
    };

    Ok(SpliceStats {
        a_to_b: a_to_b_result?,
        b_to_a: b_to_a_result?,
    })
}

async fn shutdown_writer(w: &mut BoxedWriter) -> io::Result<()> {
    w.shutdown().await
}
