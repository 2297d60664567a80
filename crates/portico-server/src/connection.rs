//! Per-connection driver.
//!
//! Runs on the I/O pool. The chain is already built when [`drive`] starts,
//! so every stage is installed before the first byte is read.

use std::net::SocketAddr;

use bytes::BytesMut;
use portico_core::{CoreError, HandlerChain, HandlerContext};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Initial capacity of the inbound buffer.
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Chain position of the outbound encoder.
const ENCODER_POSITION: usize = 0;

/// Chain position of the inbound decoder.
const DECODER_POSITION: usize = 1;

/// An error plus the chain position it was raised at.
#[derive(Debug)]
struct Failure {
    origin: usize,
    error: CoreError,
}

impl Failure {
    fn at(origin: usize, error: impl Into<CoreError>) -> Self {
        Self {
            origin,
            error: error.into(),
        }
    }
}

struct Connection {
    stream: TcpStream,
    chain: HandlerChain,
    ctx: HandlerContext,
    inbound: BytesMut,
    outbound: BytesMut,
}

/// Serves one accepted connection until the peer leaves, a stage asks to
/// close, or something fails.
pub(crate) async fn drive(stream: TcpStream, peer: SocketAddr, chain: HandlerChain) {
    let mut connection = Connection {
        stream,
        chain,
        ctx: HandlerContext::new(Some(peer)),
        inbound: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
        outbound: BytesMut::new(),
    };

    tracing::trace!(peer = %peer, "Connection active");

    if let Err(failure) = connection.run().await {
        if failure.error.is_io() {
            tracing::debug!(
                peer = %peer,
                error = %failure.error,
                "Connection dropped"
            );
        } else {
            tracing::warn!(
                peer = %peer,
                stage = failure.origin,
                error = %failure.error,
                "Closing connection after error"
            );
        }
        connection
            .chain
            .fire_exception_caught(&mut connection.ctx, failure.origin, &failure.error);
    }

    connection.chain.fire_channel_inactive(&mut connection.ctx);
    // The peer may already be gone.
    let _ = connection.stream.shutdown().await;

    tracing::trace!(peer = %peer, "Connection inactive");
}

impl Connection {
    async fn run(&mut self) -> Result<(), Failure> {
        self.chain
            .fire_channel_active(&mut self.ctx)
            .map_err(|e| Failure::at(self.ctx.stage_index(), e))?;
        self.flush().await?;

        while !self.ctx.is_close_requested() {
            let read = self
                .stream
                .read_buf(&mut self.inbound)
                .await
                .map_err(|e| Failure::at(DECODER_POSITION, e))?;

            if read == 0 {
                if !self.inbound.is_empty() {
                    tracing::debug!(
                        buffered = self.inbound.len(),
                        "Peer closed with a partial frame buffered"
                    );
                }
                return Ok(());
            }

            self.dispatch_buffered().await?;
        }

        Ok(())
    }

    /// Decodes and dispatches every whole frame in the inbound buffer.
    async fn dispatch_buffered(&mut self) -> Result<(), Failure> {
        loop {
            let frame = self
                .chain
                .decode(&mut self.inbound)
                .map_err(|e| Failure::at(DECODER_POSITION, e))?;
            let Some(frame) = frame else {
                return Ok(());
            };

            let result = self.chain.fire_channel_read(&mut self.ctx, frame).await;
            result.map_err(|e| Failure::at(self.ctx.stage_index(), e))?;
            self.flush().await?;

            if self.ctx.is_close_requested() {
                return Ok(());
            }
        }
    }

    /// Encodes queued writes and sends them.
    async fn flush(&mut self) -> Result<(), Failure> {
        let frames = self.ctx.take_outbound();
        if frames.is_empty() {
            return Ok(());
        }

        for frame in frames {
            self.chain
                .encode(frame, &mut self.outbound)
                .map_err(|e| Failure::at(ENCODER_POSITION, e))?;
        }

        self.stream
            .write_all(&self.outbound)
            .await
            .map_err(|e| Failure::at(ENCODER_POSITION, e))?;
        self.outbound.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bytes::{BufMut, Bytes};
    use portico_core::{
        handler_fn, length_field_framing, BoxFuture, ChannelHandler, Flow, HandlerChainBuilder,
        HandlerEntity,
    };
    use tokio::net::TcpListener;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_u32(u32::try_from(payload.len()).unwrap());
        out.put_slice(payload);
        out.to_vec()
    }

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let len = stream.read_u32().await.unwrap() as usize;
        let mut payload = vec![0; len];
        stream.read_exact(&mut payload).await.unwrap();
        payload
    }

    /// Accepts one connection and drives it with a chain built from `snapshot`.
    async fn serve_one(
        snapshot: Vec<HandlerEntity>,
        max: usize,
    ) -> (TcpStream, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let chain = HandlerChainBuilder::new(length_field_framing(max))
            .build(&snapshot)
            .unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            drive(stream, peer, chain).await;
        });

        let client = TcpStream::connect(addr).await.unwrap();
        (client, server)
    }

    #[derive(Default)]
    struct Counting {
        active: AtomicUsize,
        inactive: AtomicUsize,
        errors: AtomicUsize,
    }

    impl ChannelHandler for Counting {
        fn channel_active(&self, _ctx: &mut HandlerContext) -> Result<(), CoreError> {
            self.active.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn channel_read<'a>(
            &'a self,
            _ctx: &'a mut HandlerContext,
            frame: Bytes,
        ) -> BoxFuture<'a, Result<Flow, CoreError>> {
            Box::pin(async move { Ok(Flow::Continue(frame)) })
        }

        fn channel_inactive(&self, _ctx: &mut HandlerContext) {
            self.inactive.fetch_add(1, Ordering::SeqCst);
        }

        fn exception_caught(&self, _ctx: &mut HandlerContext, _error: &CoreError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn echo() -> HandlerEntity {
        HandlerEntity::new(
            10,
            handler_fn(|ctx, frame| {
                ctx.write(frame);
                Ok(Flow::Consumed)
            }),
            Some("echo".into()),
        )
    }

    #[tokio::test]
    async fn test_echoes_frames_in_order() {
        let (mut client, server) = serve_one(vec![echo()], 1024).await;

        let mut wire = frame(b"one");
        wire.extend(frame(b"two"));
        client.write_all(&wire).await.unwrap();

        assert_eq!(read_frame(&mut client).await, b"one");
        assert_eq!(read_frame(&mut client).await, b"two");

        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let (mut client, server) = serve_one(vec![echo()], 1024).await;

        let wire = frame(b"split");
        client.write_all(&wire[..3]).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        client.write_all(&wire[3..]).await.unwrap();

        assert_eq!(read_frame(&mut client).await, b"split");

        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_callbacks_bracket_the_connection() {
        let counting = Arc::new(Counting::default());
        let snapshot = vec![
            HandlerEntity::from_shared(0, counting.clone(), None),
            echo(),
        ];
        let (mut client, server) = serve_one(snapshot, 1024).await;

        client.write_all(&frame(b"hi")).await.unwrap();
        assert_eq!(read_frame(&mut client).await, b"hi");
        assert_eq!(counting.active.load(Ordering::SeqCst), 1);

        drop(client);
        server.await.unwrap();

        assert_eq!(counting.inactive.load(Ordering::SeqCst), 1);
        assert_eq!(counting.errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let counting = Arc::new(Counting::default());
        let snapshot = vec![HandlerEntity::from_shared(0, counting.clone(), None)];
        let (mut client, server) = serve_one(snapshot, 4).await;

        client.write_all(&frame(b"too long")).await.unwrap();
        server.await.unwrap();

        // A reset is as good as an orderly close here.
        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await;
        assert!(rest.is_empty());
        assert_eq!(counting.errors.load(Ordering::SeqCst), 1);
        assert_eq!(counting.inactive.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_closes_connection() {
        let snapshot = vec![HandlerEntity::new(
            0,
            handler_fn(|_ctx, _frame| Err(CoreError::handler("strict", "rejected"))),
            Some("strict".into()),
        )];
        let (mut client, server) = serve_one(snapshot, 1024).await;

        client.write_all(&frame(b"x")).await.unwrap();
        server.await.unwrap();

        // A reset is as good as an orderly close here.
        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await;
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_stage_can_close_after_reply() {
        let snapshot = vec![HandlerEntity::new(
            0,
            handler_fn(|ctx, frame| {
                ctx.write(frame);
                ctx.close();
                Ok(Flow::Consumed)
            }),
            Some("once".into()),
        )];
        let (mut client, server) = serve_one(snapshot, 1024).await;

        client.write_all(&frame(b"bye")).await.unwrap();
        assert_eq!(read_frame(&mut client).await, b"bye");
        server.await.unwrap();

        // A reset is as good as an orderly close here.
        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await;
        assert!(rest.is_empty());
    }
}
