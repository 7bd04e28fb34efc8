//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use coachdesk_billing::{
    BillingService, CaktoAdapter, HotmartAdapter, KiwifyAdapter, PlanCatalog,
};

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub billing: Arc<BillingService>,
    pub hotmart: Arc<HotmartAdapter>,
    pub kiwify: Arc<KiwifyAdapter>,
    pub cakto: Arc<CaktoAdapter>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let catalog = PlanCatalog::builtin();
        let billing = Arc::new(BillingService::from_env(pool.clone()));

        let hotmart = Arc::new(HotmartAdapter::new(
            config.hotmart_hottok.clone(),
            catalog.clone(),
        ));
        let kiwify = Arc::new(KiwifyAdapter::new(
            config.kiwify_webhook_secret.clone(),
            catalog.clone(),
        ));
        let cakto = Arc::new(CaktoAdapter::new(
            config.cakto_webhook_secret.clone(),
            catalog,
        ));

        Self {
            pool,
            config,
            billing,
            hotmart,
            kiwify,
            cakto,
        }
    }
}
