//! Bounded worker fan-out for batch file operations.
//!
//! Jobs execute on a small fixed pool of OS threads; results come back in
//! input order regardless of completion order. The first fatal error flips a
//! cancel flag so queued jobs are skipped rather than started.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SyncError;

/// Run `jobs` on at most `workers` threads and return their results in input
/// order. A job error cancels the remaining queue and becomes the return
/// error (the lowest-index error when several race).
pub fn run_ordered<T, F>(workers: usize, jobs: Vec<F>) -> Result<Vec<T>, SyncError>
where
    T: Send,
    F: FnOnce() -> Result<T, SyncError> + Send,
{
    let total = jobs.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let workers = workers.clamp(1, total);

    let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, F)>();
    for job in jobs.into_iter().enumerate() {
        // The channel is unbounded and both ends are alive.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, Result<T, SyncError>)>();
    let cancel = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = &cancel;
            scope.spawn(move || {
                while let Ok((index, job)) = job_rx.recv() {
                    if cancel.load(Ordering::SeqCst) {
                        continue;
                    }
                    let outcome = job();
                    if outcome.is_err() {
                        cancel.store(true, Ordering::SeqCst);
                    }
                    let _ = result_tx.send((index, outcome));
                }
            });
        }
    });
    drop(result_tx);

    let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut first_error: Option<(usize, SyncError)> = None;
    for (index, outcome) in result_rx.iter() {
        match outcome {
            Ok(value) => slots[index] = Some(value),
            Err(error) => {
                let replace = first_error
                    .as_ref()
                    .map(|(at, _)| index < *at)
                    .unwrap_or(true);
                if replace {
                    first_error = Some((index, error));
                }
            }
        }
    }
    if let Some((_, error)) = first_error {
        return Err(error);
    }

    slots
        .into_iter()
        .collect::<Option<Vec<T>>>()
        .ok_or(SyncError::Canceled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn results_come_back_in_input_order() {
        let jobs: Vec<_> = (0..16)
            .map(|index| {
                move || {
                    // Later jobs finish first.
                    std::thread::sleep(Duration::from_millis(16 - index as u64));
                    Ok(index)
                }
            })
            .collect();
        let results = run_ordered(4, jobs).expect("run");
        assert_eq!(results, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn concurrency_never_exceeds_the_worker_count() {
        let live = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let jobs: Vec<_> = (0..12)
            .map(|_| {
                let live = &live;
                let peak = &peak;
                move || {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .collect();
        run_ordered(3, jobs).expect("run");
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn a_fatal_error_cancels_queued_jobs() {
        let executed = AtomicUsize::new(0);
        let jobs: Vec<_> = (0..64)
            .map(|index| {
                let executed = &executed;
                move || {
                    executed.fetch_add(1, Ordering::SeqCst);
                    if index == 0 {
                        std::thread::sleep(Duration::from_millis(5));
                        return Err(SyncError::Canceled);
                    }
                    Ok(index)
                }
            })
            .collect();
        let error = run_ordered(1, jobs).unwrap_err();
        assert!(matches!(error, SyncError::Canceled));
        // With one worker the failing first job gates everything behind it.
        assert_eq!(executed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_batches_are_a_no_op() {
        let jobs: Vec<fn() -> Result<(), SyncError>> = Vec::new();
        assert!(run_ordered(4, jobs).expect("run").is_empty());
    }
}
