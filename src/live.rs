//! Live (keystroke-time) analysis.
//!
//! Keyword detection runs immediately on every update. Classification is
//! debounced: each update bumps a generation token and replaces the pending
//! task, and a result is only accepted while its generation is still current.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::classify::{ClassifierResult, DynClassifier};
use crate::detect::{detect, PatternVerdict};
use crate::logging::anon_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    /// Nothing to classify (empty or too short).
    Idle,
    /// Waiting for the quiet period or for the classifier.
    Pending,
    Ready,
    /// Classifier gave no result; keyword signals still apply.
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub generation: u64,
    pub keyword: PatternVerdict,
    pub classification: Option<ClassifierResult>,
    pub status: LiveStatus,
}

impl LiveSnapshot {
    fn idle(generation: u64, keyword: PatternVerdict) -> Self {
        Self {
            generation,
            keyword,
            classification: None,
            status: LiveStatus::Idle,
        }
    }
}

struct LiveState {
    snapshot: LiveSnapshot,
    text_id: Option<String>,
    pending: Option<JoinHandle<()>>,
}

pub struct LiveAnalyzer {
    classifier: DynClassifier,
    debounce: Duration,
    min_chars: usize,
    generation: AtomicU64,
    state: Mutex<LiveState>,
}

impl LiveAnalyzer {
    pub fn new(classifier: DynClassifier, debounce: Duration, min_chars: usize) -> Self {
        Self {
            classifier,
            debounce,
            min_chars,
            generation: AtomicU64::new(0),
            state: Mutex::new(LiveState {
                snapshot: LiveSnapshot::idle(0, PatternVerdict::none()),
                text_id: None,
                pending: None,
            }),
        }
    }

    /// Register new text. Returns the generation token for this input.
    pub fn update(self: &Arc<Self>, text: &str) -> u64 {
        let keyword = detect(text);
        let trimmed = text.trim();

        // Token allocation and snapshot replacement share the lock so a newer
        // input can never be overwritten by an older one.
        let mut st = self.state.lock().expect("live state poisoned");
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(h) = st.pending.take() {
            h.abort();
        }

        if trimmed.chars().count() < self.min_chars {
            st.snapshot = LiveSnapshot::idle(generation, keyword);
            st.text_id = None;
            return generation;
        }

        st.snapshot = LiveSnapshot {
            generation,
            keyword,
            classification: None,
            status: LiveStatus::Pending,
        };
        st.text_id = Some(anon_hash(trimmed));

        let this = Arc::clone(self);
        let owned = trimmed.to_string();
        st.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            let result = this.classifier.classify(&owned).await;
            this.accept(generation, result);
        }));
        generation
    }

    fn accept(&self, generation: u64, result: Option<ClassifierResult>) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(target: "classify", generation, "stale live result dropped");
            return;
        }
        let mut st = self.state.lock().expect("live state poisoned");
        if st.snapshot.generation != generation {
            return;
        }
        st.snapshot.status = if result.is_some() {
            LiveStatus::Ready
        } else {
            counter!("triage_classifier_unavailable_total").increment(1);
            LiveStatus::Unavailable
        };
        st.snapshot.classification = result;
        st.pending = None;
    }

    /// Abort an in-flight classification. The current input resolves to `Unavailable`.
    pub fn cancel(&self) {
        let mut st = self.state.lock().expect("live state poisoned");
        if let Some(h) = st.pending.take() {
            h.abort();
            if st.snapshot.status == LiveStatus::Pending {
                st.snapshot.status = LiveStatus::Unavailable;
            }
        }
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        self.state.lock().expect("live state poisoned").snapshot.clone()
    }

    /// Accepted classification for exactly this text, if any.
    pub fn cached_for(&self, text: &str) -> Option<ClassifierResult> {
        let id = anon_hash(text.trim());
        let st = self.state.lock().expect("live state poisoned");
        if st.snapshot.status == LiveStatus::Ready && st.text_id.as_deref() == Some(id.as_str()) {
            st.snapshot.classification.clone()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::DemoClassifier;
    use crate::detect::PatternId;

    fn analyzer() -> Arc<LiveAnalyzer> {
        Arc::new(LiveAnalyzer::new(
            Arc::new(DemoClassifier::new()),
            Duration::from_millis(1_500),
            20,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn short_text_only_gets_keyword_check() {
        let live = analyzer();
        let g = live.update("teacher hit me");
        let snap = live.snapshot();
        assert_eq!(snap.generation, g);
        assert_eq!(snap.status, LiveStatus::Idle);
        assert!(snap.keyword.is(PatternId::TeacherInvolved));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(live.snapshot().classification.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_edits_classifies_only_the_last() {
        let live = analyzer();
        live.update("someone keeps pushing me in the hallway");
        let last = live.update("someone keeps pushing me in the hallway every day");
        assert_eq!(live.snapshot().status, LiveStatus::Pending);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snap = live.snapshot();
        assert_eq!(snap.generation, last);
        assert_eq!(snap.status, LiveStatus::Ready);
        assert!(live
            .cached_for("someone keeps pushing me in the hallway every day")
            .is_some());
        assert!(live.cached_for("someone keeps pushing me in the hallway").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_updates_settle_on_the_newest_input() {
        let live = Arc::new(LiveAnalyzer::new(
            Arc::new(DemoClassifier::new()),
            Duration::from_millis(5),
            20,
        ));
        for round in 0..50 {
            let barrier = Arc::new(tokio::sync::Barrier::new(8));
            let tasks: Vec<_> = (0..8)
                .map(|i| {
                    let live = live.clone();
                    let barrier = barrier.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        live.update(&format!("round {round} draft number {i} of my report"))
                    })
                })
                .collect();
            let mut newest = 0;
            for t in tasks {
                newest = newest.max(t.await.unwrap());
            }

            let mut snap = live.snapshot();
            for _ in 0..200 {
                if snap.status != LiveStatus::Pending {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                snap = live.snapshot();
            }
            assert_eq!(snap.generation, newest, "round {round}");
            assert_eq!(snap.status, LiveStatus::Ready, "round {round}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_resolves_to_unavailable() {
        let live = analyzer();
        live.update("i am worried about my friend at lunch");
        live.cancel();
        assert_eq!(live.snapshot().status, LiveStatus::Unavailable);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(live.snapshot().status, LiveStatus::Unavailable);
    }
}
