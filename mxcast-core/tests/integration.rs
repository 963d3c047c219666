//! Integration tests: image → sender → transport → receiver, over a
//! real TCP connection on localhost and over the in-memory loopback.

use std::sync::Arc;
use std::time::Duration;

use mxcast_core::{
    AssemblerConfig, ByteOrder, ChunkSerializer, FRAME_BYTES, FrameKey, FrameReceiver, FrameSender,
    Image, LinkState, MemoryTransport, MxError, PixelBuffer, SenderConfig, TcpTransport,
    Transport, WireFormat, convert,
};
use tokio::net::TcpListener;

// ── Helpers ──────────────────────────────────────────────────────

fn photo(width: u32, height: u32) -> Image {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[
                (x * 255 / width) as u8,
                (y * 255 / height) as u8,
                ((x + y) % 256) as u8,
                0xFF,
            ]);
        }
    }
    Image::from_rgba(width, height, data).unwrap()
}

fn config(format: WireFormat, chunk_size: usize) -> SenderConfig {
    SenderConfig {
        format,
        chunk_size,
        byte_order: ByteOrder::BigEndian,
    }
}

type Started = (
    Arc<FrameReceiver>,
    tokio::sync::mpsc::Receiver<mxcast_core::CompletedFrame>,
    String,
);

/// Start a receiver on an OS-assigned port.
async fn start_receiver(format: WireFormat) -> Started {
    start_receiver_with(format, AssemblerConfig::default()).await
}

async fn start_receiver_with(format: WireFormat, assembler: AssemblerConfig) -> Started {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (receiver, frames) = FrameReceiver::new(format, assembler);
    tokio::spawn(Arc::clone(&receiver).run(listener));
    (receiver, frames, addr)
}

// ── End to end ───────────────────────────────────────────────────

#[tokio::test]
async fn binary_frame_over_tcp() {
    let (receiver, mut frames, addr) = start_receiver(WireFormat::Binary).await;

    let transport = Arc::new(TcpTransport::new(addr));
    transport.connect().await.unwrap();
    let sender = FrameSender::new(transport.clone(), config(WireFormat::Binary, 1024)).unwrap();

    let image = photo(640, 480);
    let report = sender.send_image(&image).await.unwrap();
    assert_eq!(report.chunks, 32);

    let frame = tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("timeout")
        .expect("receiver closed");

    assert_eq!(frame.key, FrameKey::Id(report.frame_id.get()));
    assert_eq!(&frame.data[..], convert(&image).unwrap().as_bytes());

    receiver.shutdown_token().cancel();
}

#[tokio::test]
async fn json_frame_over_tcp() {
    let (receiver, mut frames, addr) = start_receiver(WireFormat::Json).await;

    let transport = Arc::new(TcpTransport::new(addr));
    transport.connect().await.unwrap();
    let serializer = ChunkSerializer::with_session(WireFormat::Json, 42);
    let sender =
        FrameSender::with_serializer(transport, config(WireFormat::Json, 2400), serializer).unwrap();

    let image = photo(200, 300);
    let report = sender.send_image(&image).await.unwrap();
    assert_eq!(report.chunks, 14);

    let frame = tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("timeout")
        .expect("receiver closed");

    assert_eq!(frame.key, FrameKey::Label("frame_42_1".into()));
    let rebuilt = PixelBuffer::from_bytes(frame.data.to_vec(), ByteOrder::BigEndian).unwrap();
    assert_eq!(rebuilt, convert(&image).unwrap());

    receiver.shutdown_token().cancel();
}

#[tokio::test]
async fn consecutive_frames_get_increasing_ids() {
    let (receiver, mut frames, addr) = start_receiver(WireFormat::Binary).await;

    let transport = Arc::new(TcpTransport::new(addr));
    transport.connect().await.unwrap();
    let sender = FrameSender::new(transport, config(WireFormat::Binary, 4000)).unwrap();

    for expected in 1..=3u16 {
        let report = sender.send_image(&photo(50 + expected as u32, 50)).await.unwrap();
        assert_eq!(report.frame_id.get(), expected);
    }
    for expected in 1..=3u16 {
        let frame = tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .expect("timeout")
            .expect("receiver closed");
        assert_eq!(frame.key, FrameKey::Id(expected));
    }

    assert_eq!(receiver.stats().await.completed, 3);
    receiver.shutdown_token().cancel();
}

// ── Loopback ─────────────────────────────────────────────────────

#[tokio::test]
async fn round_trip_for_many_chunk_sizes() {
    let image = photo(333, 111);
    let expected = convert(&image).unwrap();

    for chunk_size in [1usize, 100, 1000, 2400, 8191, 32768, 65535] {
        let (transport, mut published) = MemoryTransport::new().with_sink();
        let sender = FrameSender::new(Arc::new(transport), config(WireFormat::Binary, chunk_size))
            .unwrap();
        let (receiver, mut frames) =
            FrameReceiver::new(WireFormat::Binary, AssemblerConfig::default());

        let report = sender.send_image(&image).await.unwrap();
        assert_eq!(report.chunks, FRAME_BYTES.div_ceil(chunk_size));

        while let Ok(msg) = published.try_recv() {
            receiver.handle(msg).await;
        }
        let frame = frames.try_recv().expect("frame should be complete");
        assert_eq!(&frame.data[..], expected.as_bytes(), "chunk size {chunk_size}");
    }
}

#[tokio::test]
async fn lost_chunk_means_no_frame() {
    let (transport, mut published) = MemoryTransport::new().with_sink();
    let sender = FrameSender::new(Arc::new(transport), config(WireFormat::Binary, 1024)).unwrap();
    let (receiver, mut frames) = FrameReceiver::new(
        WireFormat::Binary,
        AssemblerConfig {
            frame_timeout: Duration::from_millis(50),
            ..AssemblerConfig::default()
        },
    );

    sender.send_image(&photo(64, 64)).await.unwrap();
    let mut index = 0;
    while let Ok(msg) = published.try_recv() {
        if index != 17 {
            receiver.handle(msg).await;
        }
        index += 1;
    }
    assert!(frames.try_recv().is_err());
}

#[tokio::test]
async fn partial_frame_over_tcp_expires_on_timer() {
    let (receiver, mut frames, addr) = start_receiver_with(
        WireFormat::Binary,
        AssemblerConfig {
            frame_timeout: Duration::from_millis(100),
            ..AssemblerConfig::default()
        },
    )
    .await;

    // Render the frame's chunks, then replay all but one over TCP.
    let (sink, mut published) = MemoryTransport::new().with_sink();
    let sender = FrameSender::new(Arc::new(sink), config(WireFormat::Binary, 1024)).unwrap();
    sender.send_image(&photo(64, 64)).await.unwrap();

    let transport = TcpTransport::new(addr);
    transport.connect().await.unwrap();
    let mut index = 0;
    while let Ok(msg) = published.try_recv() {
        if index != 5 {
            transport.publish(&msg.channel, msg.payload).await.unwrap();
        }
        index += 1;
    }
    assert_eq!(index, 32);

    tokio::time::timeout(Duration::from_secs(5), async {
        while receiver.stats().await.expired == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("partial frame never expired");

    let stats = receiver.stats().await;
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.completed, 0);
    assert!(frames.try_recv().is_err());

    receiver.shutdown_token().cancel();
}

#[tokio::test]
async fn disconnected_transport_rejects_whole_frame() {
    let transport = Arc::new(MemoryTransport::new());
    transport.set_link(LinkState::Reconnecting);
    let sender = FrameSender::new(transport.clone(), SenderConfig::default()).unwrap();

    let err = sender.send_image(&photo(10, 10)).await.unwrap_err();
    assert!(matches!(err, MxError::NotConnected));
    assert_eq!(transport.message_count(), 0);

    transport.set_link(LinkState::Connected);
    assert!(transport.is_connected());
    assert_eq!(sender.send_image(&photo(10, 10)).await.unwrap().frame_id.get(), 1);
}

#[tokio::test]
async fn same_image_same_chunks() {
    let a = Arc::new(MemoryTransport::new());
    let b = Arc::new(MemoryTransport::new());
    let sa = FrameSender::new(a.clone(), config(WireFormat::Binary, 2000)).unwrap();
    let sb = FrameSender::new(b.clone(), config(WireFormat::Binary, 2000)).unwrap();

    let image = photo(123, 456);
    sa.send_image(&image).await.unwrap();
    sb.send_image(&image).await.unwrap();

    let (ma, mb) = (a.messages(), b.messages());
    assert_eq!(ma.len(), mb.len());
    for (x, y) in ma.iter().zip(&mb) {
        // Identical except the frame id, which is also 1 for both.
        assert_eq!(x, y);
    }
}
