use std::sync::Arc;

use tracing::info;
use ulid::Ulid;

use crate::auth::Caller;
use crate::booking::Error;
use crate::config::Config;
use crate::model::{Category, RoomInfo};
use crate::policy;
use crate::store::Store;

/// Thin CRUD over rooms and categories. Mutations are administrator-only;
/// listing is public.
pub struct CatalogService {
    store: Arc<Store>,
    admin_permission: i64,
}

impl CatalogService {
    pub fn new(store: Arc<Store>, config: &Config) -> Self {
        Self {
            store,
            admin_permission: config.admin_permission,
        }
    }

    fn require_admin(&self, caller: &Caller) -> Result<(), Error> {
        if policy::is_admin(caller, self.admin_permission) {
            Ok(())
        } else {
            Err(Error::Forbidden)
        }
    }

    pub async fn add_room(
        &self,
        caller: &Caller,
        name: String,
        seats: u32,
        category_id: Option<Ulid>,
    ) -> Result<RoomInfo, Error> {
        self.require_admin(caller)?;
        let room = self.store.add_room(name, seats, category_id).await?;
        info!(room = %room.id, name = %room.name, "room added");
        Ok(room)
    }

    pub async fn delete_room(&self, caller: &Caller, id: Ulid) -> Result<(), Error> {
        self.require_admin(caller)?;
        self.store.delete_room(id).await?;
        info!(room = %id, "room deleted");
        Ok(())
    }

    pub async fn add_category(
        &self,
        caller: &Caller,
        name: String,
        description: String,
    ) -> Result<Category, Error> {
        self.require_admin(caller)?;
        let category = self.store.add_category(name, description).await?;
        info!(category = %category.id, name = %category.name, "category added");
        Ok(category)
    }

    pub async fn delete_category(&self, caller: &Caller, id: Ulid) -> Result<(), Error> {
        self.require_admin(caller)?;
        self.store.delete_category(id).await?;
        info!(category = %id, "category deleted");
        Ok(())
    }

    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        self.store.list_rooms().await
    }

    pub fn list_categories(&self) -> Vec<Category> {
        self.store.list_categories()
    }
}
