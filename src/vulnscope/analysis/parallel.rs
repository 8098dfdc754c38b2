//! Bounded-concurrency fan-out for analysis work.
//!
//! One semaphore is the engine's only global throttle: every bulk analysis
//! task acquires a permit before running, so no more than
//! `max_concurrency` guarded tasks ever execute simultaneously. Results are
//! returned in submission order regardless of completion order.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::vulnscope::config::AnalysisSettings;

/// A file scheduled for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub file_id: i64,
    pub path: String,
    pub language: String,
}

/// Orchestrates parallel execution of analysis tasks.
///
/// # Example
///
/// ```rust
/// use vulnscope::analysis::ParallelOrchestrator;
/// use vulnscope::config::AnalysisSettings;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let orchestrator = ParallelOrchestrator::new(&AnalysisSettings {
///     max_concurrency: Some(2),
/// });
/// let results = orchestrator
///     .execute_parallel_tasks((0..5).map(|n| async move { n * 2 }).collect())
///     .await;
/// assert_eq!(results, vec![0, 2, 4, 6, 8]);
/// # }
/// ```
pub struct ParallelOrchestrator {
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
}

impl ParallelOrchestrator {
    /// Create an orchestrator. The permit count comes from
    /// `analysis.max_concurrency`, defaulting to the host CPU count.
    pub fn new(settings: &AnalysisSettings) -> Self {
        let max_concurrency = settings
            .max_concurrency
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            });
        log::info!(
            "parallel orchestrator initialized with max concurrency {}",
            max_concurrency
        );
        Self {
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
        }
    }

    /// The configured permit count.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every task under the semaphore, returning results in submission
    /// order. A failing task's error value is its marker result; it stops
    /// nothing else.
    pub async fn execute_parallel_tasks<T, F>(&self, tasks: Vec<F>) -> Vec<T>
    where
        F: Future<Output = T> + Send,
        T: Send,
    {
        if tasks.is_empty() {
            return Vec::new();
        }
        log::debug!(
            "executing {} tasks in parallel (max concurrency {})",
            tasks.len(),
            self.max_concurrency
        );
        let guarded = tasks.into_iter().map(|task| {
            let semaphore = self.semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.ok();
                task.await
            }
        });
        join_all(guarded).await
    }

    /// Map a task generator over files, then run everything in parallel.
    pub async fn parallelize_by_file<T, F, G>(&self, files: &[FileRef], task_generator: G) -> Vec<T>
    where
        G: Fn(&FileRef) -> F,
        F: Future<Output = T> + Send,
        T: Send,
    {
        let tasks: Vec<F> = files.iter().map(task_generator).collect();
        self.execute_parallel_tasks(tasks).await
    }

    /// Group files into balanced batches for parallel processing.
    ///
    /// Files are grouped by language and pulled round-robin across groups so
    /// each batch mixes languages. A `batch_size` of zero picks an automatic
    /// size: `max(1, n / (2 * concurrency))`, clamped to `[5, n]`.
    pub fn optimized_file_batches(
        &self,
        files: &[FileRef],
        batch_size: usize,
    ) -> Vec<Vec<FileRef>> {
        if files.is_empty() {
            return Vec::new();
        }

        let batch_size = if batch_size == 0 {
            let auto = std::cmp::max(1, files.len() / (self.max_concurrency * 2));
            std::cmp::min(std::cmp::max(auto, 5), files.len())
        } else {
            batch_size
        };

        let mut groups: Vec<(String, Vec<&FileRef>)> = Vec::new();
        for file in files {
            match groups.iter().position(|(lang, _)| *lang == file.language) {
                Some(idx) => groups[idx].1.push(file),
                None => groups.push((file.language.clone(), vec![file])),
            }
        }
        // Larger groups first so they drain evenly across batches.
        groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        let mut batches: Vec<Vec<FileRef>> = Vec::new();
        let mut current: Vec<FileRef> = Vec::new();
        let mut cursors = vec![0usize; groups.len()];

        loop {
            let mut pulled = false;
            for (group_idx, (_, group)) in groups.iter().enumerate() {
                if cursors[group_idx] < group.len() {
                    current.push(group[cursors[group_idx]].clone());
                    cursors[group_idx] += 1;
                    pulled = true;
                    if current.len() >= batch_size {
                        batches.push(std::mem::take(&mut current));
                    }
                }
            }
            if !pulled {
                break;
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }

        log::debug!(
            "created {} optimized batches from {} files",
            batches.len(),
            files.len()
        );
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: i64, language: &str) -> FileRef {
        FileRef {
            file_id: id,
            path: format!("src/{}.x", id),
            language: language.to_string(),
        }
    }

    #[test]
    fn batches_interleave_languages() {
        let orchestrator = ParallelOrchestrator::new(&AnalysisSettings {
            max_concurrency: Some(2),
        });
        let files: Vec<FileRef> = (0..6)
            .map(|i| file(i, if i % 2 == 0 { "Python" } else { "JavaScript" }))
            .collect();
        let batches = orchestrator.optimized_file_batches(&files, 2);
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 6);
        // Every full batch holds one file of each language.
        assert_ne!(batches[0][0].language, batches[0][1].language);
    }

    #[test]
    fn automatic_batch_size_clamps_low() {
        let orchestrator = ParallelOrchestrator::new(&AnalysisSettings {
            max_concurrency: Some(4),
        });
        let files: Vec<FileRef> = (0..7).map(|i| file(i, "Python")).collect();
        // auto = max(1, 7/8) = 1, clamped up to 5
        let batches = orchestrator.optimized_file_batches(&files, 0);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 5);
        assert_eq!(batches[1].len(), 2);
    }
}
