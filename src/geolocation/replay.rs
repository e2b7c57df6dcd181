//! Recorded-track geolocation source.
//!
//! Replays a JSON-lines file of [`LocationFix`] records, one object per
//! line, pacing emission by the gaps between recorded timestamps. Blank
//! lines and lines starting with `#` are skipped.
//!
//! ```text
//! {"latitude":55.7558,"longitude":37.6173,"timestamp":1700000000000}
//! {"latitude":55.7561,"longitude":37.6180,"timestamp":1700000030000,"accuracy":6.0}
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{FixFilter, GeolocationError, GeolocationSource, Watch, WatchId, WatchOptions};
use crate::constants::WATCH_CHANNEL_CAPACITY;
use crate::location::LocationFix;

/// Geolocation source backed by a recorded track.
#[derive(Debug)]
pub struct ReplaySource {
    track: Arc<Vec<LocationFix>>,
    speed: f64,
    restamp: bool,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<WatchId, JoinHandle<()>>>,
}

impl ReplaySource {
    /// Load a track from a JSON-lines file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read track file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid track file {}", path.display()))
    }

    /// Parse a JSON-lines track.
    pub fn parse(text: &str) -> Result<Self> {
        let mut track = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fix: LocationFix = serde_json::from_str(line)
                .with_context(|| format!("line {}: not a location fix", index + 1))?;
            track.push(fix);
        }
        anyhow::ensure!(!track.is_empty(), "track contains no fixes");

        Ok(Self {
            track: Arc::new(track),
            speed: 1.0,
            restamp: false,
            next_id: AtomicU64::new(0),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Playback speed multiplier (2.0 plays twice as fast). Non-positive
    /// values are ignored.
    pub fn with_speed(mut self, speed: f64) -> Self {
        if speed.is_finite() && speed > 0.0 {
            self.speed = speed;
        }
        self
    }

    /// Replace recorded timestamps with the wall-clock time of emission.
    pub fn with_restamp(mut self, restamp: bool) -> Self {
        self.restamp = restamp;
        self
    }

    /// Number of fixes in the track.
    #[must_use]
    pub fn len(&self) -> usize {
        self.track.len()
    }

    /// Whether the track is empty (never true for a parsed track).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }
}

#[async_trait]
impl GeolocationSource for ReplaySource {
    async fn request_authorization(&self) -> Result<(), GeolocationError> {
        Ok(())
    }

    fn watch(&self, options: WatchOptions) -> Result<Watch, GeolocationError> {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);

        let task = tokio::spawn(replay(
            Arc::clone(&self.track),
            self.speed,
            self.restamp,
            FixFilter::new(options),
            tx,
        ));
        self.tasks
            .lock()
            .expect("ReplaySource mutex poisoned")
            .insert(id, task);

        log::info!(
            "[Geolocation] Replaying {} fixes at {}x (watch {})",
            self.track.len(),
            self.speed,
            id.0
        );
        Ok(Watch { id, fixes: rx })
    }

    fn clear_watch(&self, id: WatchId) {
        let task = self
            .tasks
            .lock()
            .expect("ReplaySource mutex poisoned")
            .remove(&id);
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for (_, task) in tasks.drain() {
                task.abort();
            }
        }
    }
}

async fn replay(
    track: Arc<Vec<LocationFix>>,
    speed: f64,
    restamp: bool,
    mut filter: FixFilter,
    tx: mpsc::Sender<Result<LocationFix, GeolocationError>>,
) {
    let mut previous_ts: Option<i64> = None;

    for fix in track.iter() {
        if let Some(prev) = previous_ts {
            let gap_ms = fix.timestamp.saturating_sub(prev).max(0) as f64 / speed;
            tokio::time::sleep(Duration::from_millis(gap_ms as u64)).await;
        }
        previous_ts = Some(fix.timestamp);

        if !filter.accept(fix) {
            continue;
        }

        let mut fix = fix.clone();
        if restamp {
            fix.timestamp = chrono::Utc::now().timestamp_millis();
        }
        if tx.send(Ok(fix)).await.is_err() {
            return;
        }
    }

    log::info!("[Geolocation] Replay finished");
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::geolocation::Accuracy;

    const TRACK: &str = "\
# morning walk
{\"latitude\":0.0,\"longitude\":0.0,\"timestamp\":0}

{\"latitude\":0.0,\"longitude\":0.001,\"timestamp\":1000}
{\"latitude\":0.0,\"longitude\":0.002,\"timestamp\":2000,\"accuracy\":5.0}
";

    fn unfiltered() -> WatchOptions {
        WatchOptions {
            accuracy: Accuracy::High,
            min_interval: Duration::ZERO,
            min_distance_meters: 0.0,
        }
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let source = ReplaySource::parse(TRACK).unwrap();
        assert_eq!(source.len(), 3);
    }

    #[test]
    fn test_parse_reports_bad_line() {
        let err = ReplaySource::parse("{\"latitude\":1}\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
    }

    #[test]
    fn test_parse_rejects_empty_track() {
        assert!(ReplaySource::parse("# nothing\n\n").is_err());
    }

    #[test]
    fn test_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TRACK.as_bytes()).unwrap();
        let source = ReplaySource::from_path(file.path()).unwrap();
        assert_eq!(source.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_paces_by_timestamps() {
        let source = ReplaySource::parse(TRACK).unwrap();
        let mut watch = source.watch(unfiltered()).unwrap();
        let start = tokio::time::Instant::now();

        let mut stamps = Vec::new();
        while let Some(item) = watch.fixes.recv().await {
            stamps.push(item.unwrap().timestamp);
        }

        assert_eq!(stamps, vec![0, 1000, 2000]);
        assert!(start.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_speed_shortens_gaps() {
        let source = ReplaySource::parse(TRACK).unwrap().with_speed(4.0);
        let mut watch = source.watch(unfiltered()).unwrap();
        let start = tokio::time::Instant::now();
        while watch.fixes.recv().await.is_some() {}
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_watch_stops_replay() {
        let source = ReplaySource::parse(TRACK).unwrap();
        let mut watch = source.watch(unfiltered()).unwrap();
        assert!(watch.fixes.recv().await.is_some());
        source.clear_watch(watch.id);
        assert!(watch.fixes.recv().await.is_none());
    }
}
