//! Enrollment orchestrator.
//!
//! Drives the two enrollment paths:
//!
//! - **Initiate**: allocate an address, generate keys, render configs, issue a
//!   credential and write the artifacts. Database writes share one
//!   transaction; the client file is staged before commit and promoted after.
//! - **Redeem**: resolve the credential, register the device's capabilities,
//!   revoke the credential and release the client config. Registration and
//!   revocation share one transaction, so a failed redemption never revokes.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tunnelgate_core::{
    parse_capability_list, AddressSpace, Capability, Device, DeviceId, DeviceName,
    InitiateStage, InitiatedEnrollment, NetworkAddress, OwnerId, RedeemStage, ReleasedConfig,
    TokenWords,
};
use tunnelgate_wg::{render_client, ConfigParams, KeyMaterialProvider, PublicKey, ServerPeer};
use zeroize::Zeroizing;

use crate::artifacts::{ClientConfigDir, ServerConfigFile};
use crate::db::Database;
use crate::error::EnrollmentError;
use crate::store::{CapabilityRegistry, CredentialStore, DeviceStore};

/// Overlay network and the server endpoint devices connect to.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub address_space: AddressSpace,
    pub server_address: NetworkAddress,
    pub server_domain: String,
    pub server_port: u16,
    pub server_public_key: PublicKey,
    pub keepalive_seconds: u16,
}

/// A device together with the capabilities it registered.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceSummary {
    #[serde(flatten)]
    pub device: Device,
    pub capabilities: Vec<Capability>,
}

/// Coordinates the stores and artifacts for enrollment.
pub struct Enrollment {
    pool: SqlitePool,
    devices: DeviceStore,
    credentials: CredentialStore,
    capabilities: CapabilityRegistry,
    client_configs: ClientConfigDir,
    server_config: ServerConfigFile,
    keys: Arc<dyn KeyMaterialProvider>,
    overlay: OverlayConfig,
    /// Serializes allocate-and-insert within this process. Across processes
    /// the `BEGIN IMMEDIATE` transaction does the same.
    allocation_lock: Mutex<()>,
}

impl Enrollment {
    pub fn new(
        db: &Database,
        client_configs: ClientConfigDir,
        server_config: ServerConfigFile,
        keys: Arc<dyn KeyMaterialProvider>,
        overlay: OverlayConfig,
    ) -> Self {
        let pool = db.pool().clone();
        Self {
            devices: DeviceStore::new(pool.clone()),
            credentials: CredentialStore::new(pool.clone()),
            capabilities: CapabilityRegistry::new(pool.clone()),
            pool,
            client_configs,
            server_config,
            keys,
            overlay,
            allocation_lock: Mutex::new(()),
        }
    }

    pub fn devices(&self) -> &DeviceStore {
        &self.devices
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn overlay(&self) -> &OverlayConfig {
        &self.overlay
    }

    /// The address the next enrolled device would receive.
    pub async fn next_address(&self) -> Result<NetworkAddress, EnrollmentError> {
        Ok(self.devices.next_address(&self.overlay.address_space).await?)
    }

    /// Create a device, its keys, configs and a one-time credential.
    pub async fn initiate(
        &self,
        owner_id: OwnerId,
        name: DeviceName,
    ) -> Result<InitiatedEnrollment, EnrollmentError> {
        let mut stage = InitiateStage::Requested;
        let result = self.initiate_inner(owner_id, &name, &mut stage).await;

        match &result {
            Ok(enrollment) => tracing::info!(
                device_id = %enrollment.device_id,
                owner_id = %owner_id,
                address = %enrollment.network_address,
                "Enrollment initiated"
            ),
            Err(e @ EnrollmentError::AllocationExhausted { .. }) => tracing::error!(
                owner_id = %owner_id,
                stage = %stage,
                error = %e,
                "Enrollment initiate failed"
            ),
            Err(e) => tracing::warn!(
                owner_id = %owner_id,
                stage = %stage,
                error = %e,
                "Enrollment initiate failed"
            ),
        }

        result
    }

    async fn initiate_inner(
        &self,
        owner_id: OwnerId,
        name: &DeviceName,
        stage: &mut InitiateStage,
    ) -> Result<InitiatedEnrollment, EnrollmentError> {
        let guard = self.allocation_lock.lock().await;
        // Take the write lock before reading the maximum address; other
        // processes on the same file wait in busy_timeout instead of failing.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let address = self
            .devices
            .allocate(&mut tx, &self.overlay.address_space)
            .await?;
        let device = self
            .devices
            .insert(&mut tx, owner_id, name, address, Utc::now())
            .await?;
        *stage = InitiateStage::Allocated;

        let material = self.keys.generate()?;
        *stage = InitiateStage::KeyMaterialized;

        let params = ConfigParams::builder()
            .key_material(&material)
            .client_address(address)
            .server_address(self.overlay.server_address)
            .server_domain(self.overlay.server_domain.clone())
            .server_public_key(self.overlay.server_public_key)
            .server_port(self.overlay.server_port)
            .keepalive_seconds(self.overlay.keepalive_seconds)
            .build()?;
        let client_config = render_client(&params);
        let peer = params.server_peer();

        self.devices.insert_peer(&mut tx, device.id, &peer).await?;

        let file_name = address.config_file_name();
        let staged = self.client_configs.stage(&file_name, client_config.as_bytes())?;
        *stage = InitiateStage::ConfigWritten;

        let words = self.credentials.issue(&mut tx, device.id, &file_name).await?;

        // Dropping `staged` on a failed commit removes the temp file.
        tx.commit().await?;
        drop(guard);
        *stage = InitiateStage::CredentialIssued;

        let fingerprint = material.public_key.fingerprint();
        tracing::debug!(
            device_id = %device.id,
            peer = %fingerprint.short(),
            "Device keys generated"
        );

        if let Err(e) = self.publish(staged, &peer).await {
            self.compensate(device.id, &file_name).await;
            return Err(e);
        }

        Ok(InitiatedEnrollment {
            device_id: device.id,
            network_address: address,
            client_config: client_config.into_inner(),
            words,
        })
    }

    async fn publish(
        &self,
        staged: crate::artifacts::StagedConfig,
        peer: &ServerPeer,
    ) -> Result<(), EnrollmentError> {
        staged.commit()?;
        self.server_config.append_peer(peer).await?;
        Ok(())
    }

    /// Undo a committed enrollment whose artifacts could not be written.
    async fn compensate(&self, device_id: DeviceId, file_name: &str) {
        if let Err(e) = self.devices.delete(device_id).await {
            tracing::error!(device_id = %device_id, error = %e, "Failed to roll back device");
        }
        if let Err(e) = self.client_configs.remove(file_name).await {
            tracing::error!(device_id = %device_id, error = %e, "Failed to remove client config");
        }
    }

    /// Exchange a credential and capability list for the client config.
    ///
    /// `capabilities` is the raw `|`-delimited list. Any malformed entry
    /// rejects the whole redemption before anything is written.
    pub async fn redeem(
        &self,
        words: &TokenWords,
        capabilities: &str,
    ) -> Result<ReleasedConfig, EnrollmentError> {
        let mut stage = RedeemStage::CredentialPresented;
        let result = self.redeem_inner(words, capabilities, &mut stage).await;

        match &result {
            Ok(released) => tracing::info!(
                device_id = %released.device_id,
                "Enrollment config released"
            ),
            Err(e) if e.is_client_error() => tracing::warn!(
                stage = %stage,
                error = %e,
                "Enrollment redeem rejected"
            ),
            Err(e) => tracing::error!(
                stage = %stage,
                error = %e,
                "Enrollment redeem failed"
            ),
        }

        result
    }

    async fn redeem_inner(
        &self,
        words: &TokenWords,
        capabilities: &str,
        stage: &mut RedeemStage,
    ) -> Result<ReleasedConfig, EnrollmentError> {
        let redemption = self.credentials.redeem(words).await?;
        let specs = parse_capability_list(capabilities)?;
        let contents = self
            .client_configs
            .read(&redemption.config_reference)
            .await?;
        *stage = RedeemStage::Validated;

        let mut tx = self.pool.begin().await?;
        self.capabilities
            .register_all(&mut tx, redemption.device_id, &specs)
            .await?;
        *stage = RedeemStage::CapabilitiesRegistered;

        self.credentials
            .revoke_matching(&mut tx, redemption.device_id, &redemption.triple)
            .await?;
        tx.commit().await?;
        *stage = RedeemStage::CredentialRevoked;

        tracing::debug!(
            device_id = %redemption.device_id,
            capabilities = specs.len(),
            "Capabilities registered"
        );
        *stage = RedeemStage::ConfigReleased;

        Ok(ReleasedConfig {
            device_id: redemption.device_id,
            file_name: redemption.config_reference,
            contents: Zeroizing::new(contents),
        })
    }

    /// Revoke a device's pending credential. Returns whether one existed.
    pub async fn revoke_credential(&self, device_id: DeviceId) -> Result<bool, EnrollmentError> {
        let revoked = self.credentials.revoke(device_id).await?;
        if revoked {
            tracing::info!(device_id = %device_id, "Enrollment credential revoked");
        }
        Ok(revoked)
    }

    /// Devices of one owner with their capabilities.
    pub async fn list_devices(
        &self,
        owner_id: OwnerId,
    ) -> Result<Vec<DeviceSummary>, EnrollmentError> {
        let devices = self.devices.list_for_owner(owner_id).await?;
        let mut summaries = Vec::with_capacity(devices.len());
        for device in devices {
            let capabilities = self.capabilities.list(device.id).await?;
            summaries.push(DeviceSummary {
                device,
                capabilities,
            });
        }
        Ok(summaries)
    }

    /// Validate a command route and return the device's overlay address.
    pub async fn resolve_route(
        &self,
        owner_id: OwnerId,
        device_id: DeviceId,
        uri: &str,
        method: &str,
    ) -> Result<Option<NetworkAddress>, EnrollmentError> {
        Ok(self
            .capabilities
            .resolve_route(owner_id, device_id, uri, method)
            .await?)
    }

    /// Append every stored peer missing from the server config.
    pub async fn reconcile_server_config(&self) -> Result<usize, EnrollmentError> {
        let peers = self.devices.list_peers().await?;
        let added = self.server_config.reconcile(&peers).await?;
        if added > 0 {
            tracing::info!(
                added,
                path = %self.server_config.path().display(),
                "Restored peers in server config"
            );
        }
        Ok(added)
    }
}
