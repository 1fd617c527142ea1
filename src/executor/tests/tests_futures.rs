#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::executor::{TaskFuture, WorkerPool};

    #[test]
    fn test_ready_future_completes_immediately() {
        let future = TaskFuture::ready(7u32);
        assert_eq!(future.wait().unwrap(), 7);
        assert_eq!(future.peek().unwrap().unwrap(), 7);
    }

    #[test]
    fn test_all_clones_observe_the_result() {
        let pool = WorkerPool::new("clones", 1, 4);
        let future = pool.try_submit(|| "done".to_string()).unwrap();
        let other = future.clone();

        assert_eq!(future.wait().unwrap(), "done");
        assert_eq!(other.wait().unwrap(), "done");
    }

    #[test]
    fn test_wait_timeout_on_slow_task() {
        let pool = WorkerPool::new("slow", 1, 4);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let future = pool
            .try_submit(move || {
                let _ = release_rx.recv();
                1u8
            })
            .unwrap();

        assert!(future.wait_timeout(Duration::from_millis(20)).is_none());
        release_tx.send(()).unwrap();
        assert_eq!(future.wait().unwrap(), 1);
    }

    #[test]
    fn test_peek_before_completion() {
        let pool = WorkerPool::new("peek", 1, 4);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let future = pool
            .try_submit(move || {
                let _ = release_rx.recv();
            })
            .unwrap();

        assert!(future.peek().is_none());
        release_tx.send(()).unwrap();
        future.wait().unwrap();
        assert!(future.peek().is_some());
    }
}
