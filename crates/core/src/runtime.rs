use tokio::runtime::{Handle, RuntimeFlavor};

/// Runs blocking work from sync or async callers. On a multi-thread runtime the
/// worker is handed off with `block_in_place`; anywhere else `f` runs directly,
/// since `block_in_place` panics on a current-thread runtime.
pub(crate) fn run_blocking<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::run_blocking;

    #[test]
    fn runs_outside_a_runtime() {
        assert_eq!(run_blocking(|| 2 + 2), 4);
    }

    #[tokio::test]
    async fn runs_on_current_thread_runtime() {
        assert_eq!(run_blocking(|| "done"), "done");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runs_on_multi_thread_runtime() {
        assert_eq!(run_blocking(|| vec![1, 2]), vec![1, 2]);
    }
}
