// Integration tests for ordered playback of synthesized speech

use async_trait::async_trait;
use homeconnect_meet::audio::{AudioChunk, AudioSink, PlaybackQueue, WavSink, PLAYBACK_SAMPLE_RATE};
use homeconnect_meet::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
struct Rendered {
    sequence: u64,
    started: Instant,
    finished: Instant,
}

/// Holds each chunk for its duration and records when it played
struct RecordingSink {
    log: Arc<Mutex<Vec<Rendered>>>,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn render(&mut self, chunk: &AudioChunk) -> Result<()> {
        let started = Instant::now();
        tokio::time::sleep(chunk.duration()).await;
        self.log.lock().unwrap().push(Rendered {
            sequence: chunk.sequence,
            started,
            finished: Instant::now(),
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn chunk(sequence: u64, millis: usize) -> AudioChunk {
    AudioChunk {
        samples: vec![0.1; PLAYBACK_SAMPLE_RATE as usize * millis / 1000],
        sample_rate: PLAYBACK_SAMPLE_RATE,
        sequence,
    }
}

#[tokio::test(start_paused = true)]
async fn test_chunks_play_in_arrival_order_without_overlap() {
    let queue = PlaybackQueue::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();

    let driver = {
        let queue = queue.clone();
        let sink = Box::new(RecordingSink { log: Arc::clone(&log) });
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.run(sink, cancel).await })
    };

    // Uneven lengths and arrival gaps, some arriving mid-render
    let arrivals = [(0, 120), (5, 40), (3, 200), (150, 80), (0, 60), (400, 100)];
    for (sequence, (gap_ms, length_ms)) in arrivals.iter().enumerate() {
        tokio::time::sleep(Duration::from_millis(*gap_ms)).await;
        queue.enqueue(chunk(sequence as u64, *length_ms)).await;
    }

    let mut speaking = queue.subscribe_speaking();
    speaking.wait_for(|s| !*s).await.unwrap();

    let log = log.lock().unwrap().clone();
    let order: Vec<u64> = log.iter().map(|r| r.sequence).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);

    for pair in log.windows(2) {
        assert!(
            pair[1].started >= pair[0].finished,
            "chunk {} started before chunk {} finished",
            pair[1].sequence,
            pair[0].sequence
        );
    }
    assert_eq!(queue.played(), 6);

    cancel.cancel();
    driver.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_remote_speaking_tracks_queue() {
    let queue = PlaybackQueue::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();
    let mut speaking = queue.subscribe_speaking();

    let driver = {
        let queue = queue.clone();
        let sink = Box::new(RecordingSink { log: Arc::clone(&log) });
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.run(sink, cancel).await })
    };

    assert!(!*speaking.borrow_and_update());

    queue.enqueue(chunk(0, 100)).await;
    assert!(*speaking.borrow_and_update());

    // Still speaking halfway through the only chunk
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(queue.is_speaking());

    speaking.wait_for(|s| !*s).await.unwrap();
    assert_eq!(log.lock().unwrap().len(), 1);

    cancel.cancel();
    driver.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_discards_pending_chunks() {
    let queue = PlaybackQueue::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();

    for sequence in 0..5 {
        queue.enqueue(chunk(sequence, 100)).await;
    }

    let driver = {
        let queue = queue.clone();
        let sink = Box::new(RecordingSink { log: Arc::clone(&log) });
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.run(sink, cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel.cancel();
    driver.await.unwrap();

    assert_eq!(log.lock().unwrap().len(), 1);
    assert!(queue.is_empty().await);
    assert!(!queue.is_speaking());
}

#[tokio::test]
async fn test_wav_sink_records_rendered_audio() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("assistant.wav");

    {
        let mut sink = WavSink::create(&path, PLAYBACK_SAMPLE_RATE).unwrap();
        sink.render(&chunk(0, 100)).await.unwrap();
        sink.render(&chunk(1, 50)).await.unwrap();
        assert_eq!(sink.samples_written(), 3600);
        sink.close().await.unwrap();
    }

    let reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, PLAYBACK_SAMPLE_RATE);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.len(), 3600);
}
