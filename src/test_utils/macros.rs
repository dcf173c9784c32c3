/// Asserts that a [`RecordingListener`](crate::test_utils::RecordingListener) received logs from
/// exactly the given blocks, in order.
///
/// Waits for the expected number of deliveries first (default 5 seconds, configurable via
/// `timeout = N`).
///
/// # Examples
///
/// ```ignore
/// # use log_broadcaster::{assert_delivered, test_utils::RecordingListener};
/// # async fn example() {
/// let listener = RecordingListener::new(1);
/// // register and drive the broadcaster...
///
/// assert_delivered!(listener, [100, 101]);
/// # }
/// ```
///
/// # Panics
///
/// * **Timeout**: Fewer deliveries than expected arrived in time.
/// * **Wrong blocks**: The delivered block numbers differ from the expected ones, including extra
///   deliveries that arrived before the check.
#[macro_export]
macro_rules! assert_delivered {
    ($listener: expr, [$($block:expr),* $(,)?]) => {
        $crate::assert_delivered!($listener, [$($block),*], timeout = 5)
    };
    ($listener: expr, [$($block:expr),* $(,)?], timeout = $secs: expr) => {
        let expected: std::vec::Vec<u64> = std::vec![$($block),*];
        let arrived = $listener
            .wait_for_count(expected.len(), std::time::Duration::from_secs($secs))
            .await;
        assert!(
            arrived,
            "Timed out waiting for {} deliveries, got blocks {:?}",
            expected.len(),
            $listener.blocks()
        );
        assert_eq!($listener.blocks(), expected, "Unexpected deliveries");
    };
}

/// Asserts that a [`RecordingListener`](crate::test_utils::RecordingListener) receives nothing
/// new for a while (default 200 milliseconds, configurable via `for_ms = N`).
///
/// # Panics
///
/// If a delivery arrives during the wait.
#[macro_export]
macro_rules! assert_no_delivery {
    ($listener: expr) => {
        $crate::assert_no_delivery!($listener, for_ms = 200)
    };
    ($listener: expr, for_ms = $millis: expr) => {
        let before = $listener.count();
        let arrived = $listener
            .wait_for_count(before + 1, std::time::Duration::from_millis($millis))
            .await;
        assert!(!arrived, "Unexpected delivery, blocks now {:?}", $listener.blocks());
    };
}

/// Polls `condition` every 10 milliseconds until it holds (default 5 seconds, configurable via
/// `timeout = N`).
///
/// # Panics
///
/// If the condition is still false when the timeout expires.
#[macro_export]
macro_rules! assert_eventually {
    ($condition: expr) => {
        $crate::assert_eventually!($condition, timeout = 5)
    };
    ($condition: expr, timeout = $secs: expr) => {
        let deadline =
            tokio::time::Instant::now() + std::time::Duration::from_secs($secs);
        loop {
            if $condition {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "Condition `{}` not met in time",
                stringify!($condition)
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    };
}
