use anyhow::Result;
use std::sync::Arc;

use crate::store::AccountStore;

pub async fn health_check(store: &Arc<dyn AccountStore>) -> Result<()> {
    store.ping().await?;
    Ok(())
}
