use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vitals_core::buffer::{StreamRingBuffer, WriteOutcome, bounded};
use vitals_core::domain::{HrSource, SensorSample};
use vitals_core::pipeline::{ConsumerConfig, VitalChannels, VitalConsumer};
use vitals_core::reliability::HeartbeatRegistry;
use vitals_core::stream::{
    DrainConfig, PacketType, SAMPLES_PER_PACKET, StreamDrain, StreamError, StreamFormat,
    parse_packet,
};

fn consumer_with_ring(format: StreamFormat, ring: Arc<StreamRingBuffer>) -> VitalConsumer {
    let (_tx, rx) = bounded(8).unwrap();
    VitalConsumer::new(
        ConsumerConfig {
            stream_format: format,
            ..ConsumerConfig::default()
        },
        rx,
        Arc::new(VitalChannels::new()),
        Arc::new(HeartbeatRegistry::new()),
    )
    .with_stream(ring)
}

fn sample(i: i32) -> SensorSample {
    SensorSample {
        ecg: i * 10,
        bioz: 100_000 + i / 2,
        ppg_ir: 6_000 + i,
        ppg_red: 5_000,
        heart_rate: 72,
        rr_interval: 833,
        ecg_lead_off: false,
        bioz_lead_off: false,
    }
}

fn split_packets(mut bytes: &[u8]) -> Vec<(PacketType, Vec<u8>)> {
    let mut packets = Vec::new();
    while let Some((packet_type, payload, used)) = parse_packet(bytes).unwrap() {
        packets.push((packet_type, payload.to_vec()));
        bytes = &bytes[used..];
    }
    assert!(bytes.is_empty(), "trailing partial packet");
    packets
}

#[tokio::test]
async fn test_split_stream_reaches_file_sink() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stream.bin");

    let ring = Arc::new(StreamRingBuffer::new(4_096));
    let mut consumer = consumer_with_ring(StreamFormat::Split, ring.clone());
    for i in 0..(SAMPLES_PER_PACKET as i32 * 3) {
        consumer.process_sample(&sample(i), HrSource::Ecg);
    }
    assert_eq!(consumer.stats().snapshot().stream_packets, 6);

    let file = tokio::fs::File::create(&path).await.unwrap();
    let mut drain = StreamDrain::new(ring.clone(), file, DrainConfig::default());
    let written = drain.drain_pending().await.unwrap();
    assert_eq!(ring.pending(), 0);

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), written);

    let packets = split_packets(&bytes);
    assert_eq!(packets.len(), 6);
    for pair in packets.chunks(2) {
        assert_eq!(pair[0].0, PacketType::EcgBioz);
        assert_eq!(pair[0].1.len(), SAMPLES_PER_PACKET * 8 + 2);
        assert_eq!(pair[1].0, PacketType::Ppg);
        assert_eq!(pair[1].1.len(), SAMPLES_PER_PACKET * 2 + 3);
    }

    // First ECG/BioZ pair of the second packet
    let second = &packets[2].1;
    let ecg = i32::from_le_bytes(second[0..4].try_into().unwrap());
    assert_eq!(ecg, SAMPLES_PER_PACKET as i32 * 10);
}

#[tokio::test]
async fn test_legacy_stream_flags_repeated_bioz() {
    let ring = Arc::new(StreamRingBuffer::new(4_096));
    let mut consumer = consumer_with_ring(StreamFormat::Legacy, ring.clone());
    for i in 0..4 {
        consumer.process_sample(&sample(i), HrSource::Ecg);
    }

    let bytes = ring.drain(usize::MAX);
    let packets = split_packets(&bytes);
    assert_eq!(packets.len(), 4);
    assert!(packets.iter().all(|(t, p)| *t == PacketType::Legacy && p.len() == 22));

    // bioz: 100000, 100000, 100001, 100001
    let skips: Vec<u8> = packets.iter().map(|(_, p)| p[8]).collect();
    assert_eq!(skips, vec![0x00, 0xFF, 0x00, 0xFF]);
}

#[test]
fn test_full_ring_drops_whole_packets() {
    let ring = Arc::new(StreamRingBuffer::new(100));
    let mut consumer = consumer_with_ring(StreamFormat::Split, ring.clone());
    for i in 0..(SAMPLES_PER_PACKET as i32 * 4) {
        consumer.process_sample(&sample(i), HrSource::Ecg);
    }

    let stats = consumer.stats().snapshot();
    assert!(stats.stream_dropped > 0);
    // Only whole packets ever land in the ring
    let bytes = ring.drain(usize::MAX);
    assert_eq!(split_packets(&bytes).len() as u64, stats.stream_packets);
}

#[test]
fn test_corrupt_framing_rejected() {
    assert!(matches!(
        parse_packet(&[0x0B, 0xFA, 0, 0, 0x03, 0x00, 0x0B]),
        Err(StreamError::BadStart(_))
    ));
    assert!(matches!(
        parse_packet(&[0x0A, 0xFA, 0, 0, 0x09, 0x00, 0x0B]),
        Err(StreamError::UnknownPacketType(0x09))
    ));
    assert!(matches!(
        parse_packet(&[0x0A, 0xFA, 0, 0, 0x03, 0x01, 0x0B]),
        Err(StreamError::BadStop)
    ));
    assert!(parse_packet(&[0x0A, 0xFA, 4]).unwrap().is_none());
}

#[tokio::test]
async fn test_drain_task_streams_until_shutdown() {
    let ring = Arc::new(StreamRingBuffer::new(256));
    let (client, mut server) = tokio::io::duplex(1_024);
    let drain = StreamDrain::new(ring.clone(), client, DrainConfig::default());
    let stats = drain.stats();
    let token = CancellationToken::new();
    let handle = tokio::spawn(drain.run(token.clone()));

    for chunk in [[1u8; 16], [2u8; 16]] {
        assert_eq!(ring.write_packet(&chunk), WriteOutcome::Written);
        let mut buf = [0u8; 16];
        tokio::time::timeout(
            Duration::from_secs(1),
            tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(buf, chunk);
    }

    token.cancel();
    handle.await.unwrap();
    assert_eq!(stats.snapshot().bytes_written, 32);
}
