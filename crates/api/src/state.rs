//! Application state shared across handlers.

use std::sync::Arc;

use crate::cart::CartRepository;
use crate::config::AppConfig;
use crate::search::CatalogSearch;
use crate::stock::{StockOracle, StoreStockOracle};
use crate::store::{Key, KeyValueStore};
use crate::users::AccountProvisioner;
use crate::users::identity::IdentityProvider;
use crate::warehouse::WarehouseLocator;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`; wires the store and identity provider into
/// the repositories once at startup.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AppConfig,
    store: Arc<dyn KeyValueStore>,
    stock: Arc<dyn StockOracle>,
    carts: CartRepository,
    locator: WarehouseLocator,
    search: CatalogSearch,
    accounts: AccountProvisioner,
}

impl AppState {
    /// Create application state around a store and an identity provider.
    #[must_use]
    pub fn new(
        config: AppConfig,
        store: Arc<dyn KeyValueStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let stock: Arc<dyn StockOracle> = Arc::new(StoreStockOracle::new(
            Arc::clone(&store),
            config.stock_table.clone(),
            config.stock_warehouse_index.clone(),
        ));
        let carts = CartRepository::new(
            Arc::clone(&store),
            Arc::clone(&stock),
            config.cart_table.clone(),
            config.cart_ttl_days,
        );
        let locator = WarehouseLocator::new(
            Arc::clone(&store),
            config.warehouse_table.clone(),
            config.warehouse_cache_ttl,
        );
        let search = CatalogSearch::new(
            Arc::clone(&store),
            Arc::clone(&stock),
            config.catalog_table.clone(),
            config.search_page_limit,
            config.search_item_limit,
        );
        let accounts = AccountProvisioner::new(
            Arc::clone(&store),
            identity,
            config.users_table.clone(),
            config.users_email_index.clone(),
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                stock,
                carts,
                locator,
                search,
                accounts,
            }),
        }
    }

    /// Get a reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Get a reference to the cart repository.
    #[must_use]
    pub fn carts(&self) -> &CartRepository {
        &self.inner.carts
    }

    /// Get a reference to the stock oracle.
    #[must_use]
    pub fn stock(&self) -> &Arc<dyn StockOracle> {
        &self.inner.stock
    }

    /// Get a reference to the warehouse locator.
    #[must_use]
    pub fn locator(&self) -> &WarehouseLocator {
        &self.inner.locator
    }

    /// Get a reference to the catalog search.
    #[must_use]
    pub fn search(&self) -> &CatalogSearch {
        &self.inner.search
    }

    /// Get a reference to the account provisioner.
    #[must_use]
    pub fn accounts(&self) -> &AccountProvisioner {
        &self.inner.accounts
    }

    /// Whether the store answers a cheap point read (readiness probe).
    pub async fn store_ready(&self) -> bool {
        let probe = Key::new("cart_id", "__readiness__").with_sort("item_key", "META");
        self.inner
            .store
            .get(&self.inner.config.cart_table, &probe)
            .await
            .is_ok()
    }
}
