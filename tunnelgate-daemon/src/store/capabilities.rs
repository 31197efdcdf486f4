//! Capability registry: the operations each device says it supports.

use sqlx::{SqliteConnection, SqlitePool};
use tunnelgate_core::{Capability, CapabilitySpec, DeviceId, NetworkAddress, OwnerId};

use super::{decode_error, is_foreign_key_violation};

/// Errors from registering capabilities.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Append-only store of device capabilities.
#[derive(Clone)]
pub struct CapabilityRegistry {
    pool: SqlitePool,
}

impl CapabilityRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one capability. Duplicates are stored as separate rows.
    pub async fn register(
        &self,
        conn: &mut SqliteConnection,
        device_id: DeviceId,
        spec: &CapabilitySpec,
    ) -> Result<(), RegistryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO device_endpoints (device_id, uri, display_string, method)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(device_id.get())
        .bind(&spec.uri)
        .bind(&spec.display_string)
        .bind(&spec.method)
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_violation(&e) => Err(RegistryError::UnknownDevice(device_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Append several capabilities in order.
    pub async fn register_all(
        &self,
        conn: &mut SqliteConnection,
        device_id: DeviceId,
        specs: &[CapabilitySpec],
    ) -> Result<(), RegistryError> {
        for spec in specs {
            self.register(conn, device_id, spec).await?;
        }
        Ok(())
    }

    /// A device's capabilities in registration order.
    pub async fn list(&self, device_id: DeviceId) -> Result<Vec<Capability>, RegistryError> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT uri, display_string, method
            FROM device_endpoints
            WHERE device_id = ?
            ORDER BY endpoint_id
            "#,
        )
        .bind(device_id.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(uri, display_string, method)| Capability {
                device_id,
                uri,
                display_string,
                method,
            })
            .collect())
    }

    /// Check that `owner_id` owns `device_id` and the device exposes
    /// `uri` with `method`, and return the device's overlay address.
    ///
    /// This is the lookup a command proxy performs before forwarding a call.
    pub async fn resolve_route(
        &self,
        owner_id: OwnerId,
        device_id: DeviceId,
        uri: &str,
        method: &str,
    ) -> Result<Option<NetworkAddress>, RegistryError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            r#"
            SELECT d.network_address
            FROM devices d
            JOIN device_endpoints e ON e.device_id = d.device_id
            WHERE d.owner_id = ? AND d.device_id = ? AND e.uri = ? AND UPPER(e.method) = UPPER(?)
            LIMIT 1
            "#,
        )
        .bind(owner_id.get())
        .bind(device_id.get())
        .bind(uri)
        .bind(method)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(bytes,)| NetworkAddress::from_storage_bytes(&bytes))
            .transpose()
            .map_err(|e| RegistryError::Database(decode_error(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> (Database, CapabilityRegistry, DeviceId) {
        let db = Database::open_in_memory().await.unwrap();
        let mut address = [0u8; 16];
        address[0] = 0xfc;
        address[15] = 2;
        let result = sqlx::query(
            "INSERT INTO devices (owner_id, name, network_address, enrolled_at) VALUES (7, 'lamp', ?, '2025-01-01T00:00:00Z')",
        )
        .bind(address.to_vec())
        .execute(db.pool())
        .await
        .unwrap();
        let registry = CapabilityRegistry::new(db.pool().clone());
        (db, registry, DeviceId::new(result.last_insert_rowid()))
    }

    async fn register(
        db: &Database,
        registry: &CapabilityRegistry,
        device: DeviceId,
        spec: CapabilitySpec,
    ) -> Result<(), RegistryError> {
        let mut conn = db.pool().acquire().await.unwrap();
        registry.register(&mut conn, device, &spec).await
    }

    fn turn_on() -> CapabilitySpec {
        CapabilitySpec::new("/on", "Turn on", "POST")
    }

    #[tokio::test]
    async fn test_list_in_registration_order() {
        let (db, registry, device) = setup().await;
        let status = CapabilitySpec::new("/status", "Get status", "GET");
        register(&db, &registry, device, status).await.unwrap();
        register(&db, &registry, device, turn_on()).await.unwrap();

        let caps = registry.list(device).await.unwrap();
        let uris: Vec<&str> = caps.iter().map(|c| c.uri.as_str()).collect();
        assert_eq!(uris, vec!["/status", "/on"]);
        assert_eq!(caps[1].display_string, "Turn on");
        assert_eq!(caps[1].device_id, device);
    }

    #[tokio::test]
    async fn test_duplicates_are_tolerated() {
        let (db, registry, device) = setup().await;
        register(&db, &registry, device, turn_on()).await.unwrap();
        register(&db, &registry, device, turn_on()).await.unwrap();

        assert_eq!(registry.list(device).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let (db, registry, _device) = setup().await;
        let err = register(&db, &registry, DeviceId::new(999), turn_on())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownDevice(_)));
    }

    #[tokio::test]
    async fn test_resolve_route() {
        let (db, registry, device) = setup().await;
        register(&db, &registry, device, turn_on()).await.unwrap();

        let address = registry
            .resolve_route(OwnerId::new(7), device, "/on", "post")
            .await
            .unwrap();
        assert_eq!(address.map(|a| a.to_string()), Some("fc00::2".to_string()));

        // Wrong owner, uri or method
        for (owner, uri, method) in [(8, "/on", "POST"), (7, "/off", "POST"), (7, "/on", "GET")] {
            let route = registry
                .resolve_route(OwnerId::new(owner), device, uri, method)
                .await
                .unwrap();
            assert!(route.is_none(), "{owner} {method} {uri}");
        }
    }
}
