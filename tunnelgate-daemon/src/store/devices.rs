//! Device table and sequential address allocation.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tunnelgate_core::{
    AddressError, AddressSpace, Device, DeviceId, DeviceName, NetworkAddress, OwnerId,
};
use tunnelgate_wg::{PresharedKey, PublicKey, ServerPeer};

use super::{decode_error, encode_timestamp, is_unique_violation};

/// Errors from allocating addresses and writing device rows.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("address space exhausted after {last}")]
    Exhausted { last: NetworkAddress },
    /// Another writer inserted the same address first.
    #[error("address {0} already assigned")]
    AddressTaken(NetworkAddress),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<AddressError> for AllocationError {
    fn from(err: AddressError) -> Self {
        match err {
            AddressError::Exhausted { last } => Self::Exhausted { last },
            other => Self::Database(decode_error(other)),
        }
    }
}

/// Persistent device records and their WireGuard peers.
#[derive(Clone)]
pub struct DeviceStore {
    pool: SqlitePool,
}

impl DeviceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Highest address currently assigned, read from the device table.
    pub async fn max_address(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Option<NetworkAddress>, AllocationError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT network_address FROM devices ORDER BY network_address DESC LIMIT 1",
        )
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some((bytes,)) => Ok(Some(NetworkAddress::from_storage_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Compute the address the next device will get.
    ///
    /// Run inside the same transaction as [`insert`](Self::insert) so nothing
    /// can claim the address in between.
    pub async fn allocate(
        &self,
        conn: &mut SqliteConnection,
        space: &AddressSpace,
    ) -> Result<NetworkAddress, AllocationError> {
        let max = self.max_address(conn).await?;
        Ok(space.next_after(max)?)
    }

    /// Peek at the next address without reserving it.
    pub async fn next_address(
        &self,
        space: &AddressSpace,
    ) -> Result<NetworkAddress, AllocationError> {
        let mut conn = self.pool.acquire().await?;
        self.allocate(&mut conn, space).await
    }

    /// Insert a device with an already allocated address.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        owner_id: OwnerId,
        name: &DeviceName,
        network_address: NetworkAddress,
        enrolled_at: DateTime<Utc>,
    ) -> Result<Device, AllocationError> {
        let result = sqlx::query(
            r#"
            INSERT INTO devices (owner_id, name, network_address, enrolled_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(owner_id.get())
        .bind(name.as_str())
        .bind(network_address.to_storage_bytes().to_vec())
        .bind(encode_timestamp(enrolled_at))
        .execute(&mut *conn)
        .await;

        let result = match result {
            Ok(result) => result,
            Err(e) if is_unique_violation(&e) => {
                return Err(AllocationError::AddressTaken(network_address))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Device {
            id: DeviceId::new(result.last_insert_rowid()),
            owner_id,
            name: name.clone(),
            network_address,
            enrolled_at,
        })
    }

    /// Record the server side of a device's peer.
    pub async fn insert_peer(
        &self,
        conn: &mut SqliteConnection,
        device_id: DeviceId,
        peer: &ServerPeer,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO device_peers (device_id, public_key, preshared_key) VALUES (?, ?, ?)",
        )
        .bind(device_id.get())
        .bind(peer.public_key.to_base64())
        .bind(peer.preshared_key.as_bytes().to_vec())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Devices owned by `owner_id`, oldest first.
    pub async fn list_for_owner(&self, owner_id: OwnerId) -> Result<Vec<Device>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT device_id, owner_id, name, network_address, enrolled_at
            FROM devices
            WHERE owner_id = ?
            ORDER BY device_id
            "#,
        )
        .bind(owner_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_device_row).collect()
    }

    /// Every stored peer, in enrollment order.
    pub async fn list_peers(&self) -> Result<Vec<ServerPeer>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT p.public_key, p.preshared_key, d.network_address
            FROM device_peers p
            JOIN devices d ON d.device_id = p.device_id
            ORDER BY d.device_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_peer_row).collect()
    }

    /// Delete a device. Its peer, capabilities and credential go with it.
    pub async fn delete(&self, device_id: DeviceId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM devices WHERE device_id = ?")
            .bind(device_id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_device_row(row: &SqliteRow) -> Result<Device, sqlx::Error> {
    let address_bytes: Vec<u8> = row.try_get("network_address")?;
    let network_address = NetworkAddress::from_storage_bytes(&address_bytes).map_err(decode_error)?;

    let enrolled_at_str: String = row.try_get("enrolled_at")?;
    let enrolled_at = DateTime::parse_from_rfc3339(&enrolled_at_str)
        .map_err(|e| sqlx::Error::Decode(format!("Invalid enrolled_at: {}", e).into()))?
        .with_timezone(&Utc);

    Ok(Device {
        id: DeviceId::new(row.try_get("device_id")?),
        owner_id: OwnerId::new(row.try_get("owner_id")?),
        name: DeviceName::new(row.try_get::<String, _>("name")?),
        network_address,
        enrolled_at,
    })
}

fn parse_peer_row(row: &SqliteRow) -> Result<ServerPeer, sqlx::Error> {
    let public_key: String = row.try_get("public_key")?;
    let preshared_key: Vec<u8> = row.try_get("preshared_key")?;
    let address_bytes: Vec<u8> = row.try_get("network_address")?;

    Ok(ServerPeer {
        public_key: PublicKey::from_base64(&public_key).map_err(decode_error)?,
        preshared_key: PresharedKey::from_bytes(&preshared_key).map_err(decode_error)?,
        client_address: NetworkAddress::from_storage_bytes(&address_bytes).map_err(decode_error)?,
    })
}
