//! Ledger backend health check

use anyhow::Result;
use opendal::Operator;

/// Verify the backend is reachable by listing the root
pub async fn check_health(op: &Operator) -> Result<()> {
    op.list("/")
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("ledger health check failed: {e}"))
}

/// Returns true if the backend is reachable, false otherwise
pub async fn is_healthy(op: &Operator) -> bool {
    check_health(op).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::build_memory_operator;

    #[test]
    fn memory_backend_is_healthy() {
        let op = build_memory_operator().unwrap();
        assert!(tokio_test::block_on(is_healthy(&op)));
    }
}
