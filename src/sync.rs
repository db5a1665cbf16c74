use tokio::time::Instant;

/// Sleeps until `deadline`, or forever when there is none.
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_no_deadline_never_fires() {
        let fired = tokio::time::timeout(Duration::from_millis(50), sleep_until(None)).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn test_deadline_fires() {
        let deadline = Instant::now() + Duration::from_millis(10);
        let fired = tokio::time::timeout(Duration::from_secs(5), sleep_until(Some(deadline))).await;
        assert!(fired.is_ok());
    }
}
