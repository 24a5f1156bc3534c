// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::events::{Event, EventBus};

/// Watches `root` for changes to files whose extension is in `extensions`, and publishes a single
/// `Event::HostRestart` per 300ms (configurable) quiet period of matching events — a textbook
/// trailing-edge debounce: each new matching event resets the timer rather than scheduling a new
/// one, so a burst of saves collapses into exactly one restart signal.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    debounce_task: tokio::task::JoinHandle<()>,
}

impl FileWatcher {
    pub fn start(
        worker_id: impl Into<String>,
        root: &Path,
        extensions: Vec<String>,
        debounce: Duration,
        bus: EventBus,
    ) -> notify::Result<Self> {
        let worker_id = worker_id.into();
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<PathBuf>();
        let extensions = normalize_extensions(extensions);

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            if let Ok(event) = result {
                for path in event.paths {
                    let _ = raw_tx.send(path);
                }
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let debounce_task = tokio::spawn(async move {
            // `deadline` is `None` while quiescent; set to `now + debounce` on the first matching
            // event and pushed back out on every subsequent matching event, so the timer only
            // ever fires once the quiet period has genuinely elapsed. A non-matching event must
            // not perturb an already-running deadline.
            let mut deadline: Option<tokio::time::Instant> = None;
            loop {
                match deadline {
                    None => match raw_rx.recv().await {
                        Some(path) if matches_extension(&path, &extensions) => {
                            deadline = Some(tokio::time::Instant::now() + debounce);
                        }
                        Some(_) => continue,
                        None => break,
                    },
                    Some(at) => {
                        tokio::select! {
                            maybe_path = raw_rx.recv() => match maybe_path {
                                Some(path) => {
                                    if matches_extension(&path, &extensions) {
                                        deadline = Some(tokio::time::Instant::now() + debounce);
                                    }
                                }
                                None => {
                                    bus.publish(Event::HostRestart {
                                        worker_id: worker_id.clone(),
                                    });
                                    break;
                                }
                            },
                            _ = tokio::time::sleep_until(at) => {
                                bus.publish(Event::HostRestart {
                                    worker_id: worker_id.clone(),
                                });
                                deadline = None;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            debounce_task,
        })
    }

    pub fn stop(&self) {
        self.debounce_task.abort();
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.debounce_task.abort();
    }
}

fn normalize_extensions(extensions: Vec<String>) -> Vec<String> {
    extensions
        .into_iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect()
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
        None => false,
    }
}
