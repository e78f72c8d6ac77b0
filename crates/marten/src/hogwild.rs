use marten_core::{Error, Result};

// Hogwild — Lock-free parallel training over shared parameters
//
// K worker threads train against the same parameter buffers without
// synchronizing their updates. Each worker:
//
//   1. builds a shadow of the model (`shadow_copy`): every parameter's `w`
//      aliases the master buffer, every `dw` is private,
//   2. records forward passes on its own tape (tapes are thread-local by
//      construction, so this needs no setup),
//   3. runs `tape::backward()` and lets its solver write into the shared
//      `w` buffers directly.
//
// Writes between workers interleave arbitrarily and reads may be stale;
// SGD-family solvers tolerate this, which is the entire trick. Within one
// worker, `backward()` still sees every gradient contribution recorded on
// that worker's tape since its last backward, in reverse insertion order.

/// Run `f(worker_index)` on `workers` OS threads and wait for all of them.
/// The first worker error (or panic) is propagated after every thread has
/// finished.
pub fn run<F>(workers: usize, f: F) -> Result<()>
where
    F: Fn(usize) -> Result<()> + Sync,
{
    if workers == 0 {
        return Ok(());
    }
    let results = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let f = &f;
                scope.spawn(move || f(worker))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(r) => r,
                Err(_) => Err(Error::msg("worker thread panicked")),
            })
            .collect::<Vec<_>>()
    });
    for r in results {
        r?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_worker() {
        let count = AtomicUsize::new(0);
        run(5, |_| {
            count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn propagates_worker_errors() {
        let result = run(3, |worker| {
            if worker == 1 {
                Err(Error::msg("worker 1 failed"))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn survives_worker_panic() {
        let result = run(2, |worker| {
            if worker == 0 {
                panic!("boom");
            }
            Ok(())
        });
        assert!(result.is_err());
    }
}
