//! Config files on disk.
//!
//! - Client configs: one file per device, written atomically (temp file +
//!   rename) with permissions 0600
//! - Server config: one shared file, peers appended under a single-writer lock

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tunnelgate_wg::{contains_peer, render_server_peer, ServerPeer};

/// Directory holding one client config per device.
#[derive(Debug, Clone)]
pub struct ClientConfigDir {
    dir: PathBuf,
}

/// A client config written to a temp file, not yet visible under its name.
///
/// Dropping it without [`commit`](StagedConfig::commit) deletes the temp file.
#[derive(Debug)]
pub struct StagedConfig {
    file: NamedTempFile,
    target: PathBuf,
}

impl StagedConfig {
    /// Move the staged file into place.
    pub fn commit(self) -> io::Result<PathBuf> {
        self.file.persist(&self.target).map_err(|e| e.error)?;
        Ok(self.target)
    }
}

impl ClientConfigDir {
    /// Open the directory, creating it (mode 0700) if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        #[cfg(unix)]
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a config file. Rejects names that would leave the directory.
    pub fn path_for(&self, file_name: &str) -> io::Result<PathBuf> {
        let valid = !file_name.is_empty()
            && Path::new(file_name).file_name().and_then(|n| n.to_str()) == Some(file_name);
        if !valid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid config file name: {file_name:?}"),
            ));
        }
        Ok(self.dir.join(file_name))
    }

    /// Write `contents` to a temp file next to its final location.
    pub fn stage(&self, file_name: &str, contents: &[u8]) -> io::Result<StagedConfig> {
        let target = self.path_for(file_name)?;
        let mut file = NamedTempFile::new_in(&self.dir)?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600))?;

        file.write_all(contents)?;
        file.as_file().sync_all()?;

        Ok(StagedConfig { file, target })
    }

    /// Write a config in one step.
    pub fn write(&self, file_name: &str, contents: &[u8]) -> io::Result<PathBuf> {
        self.stage(file_name, contents)?.commit()
    }

    pub async fn read(&self, file_name: &str) -> io::Result<Vec<u8>> {
        let path = self.path_for(file_name)?;
        tokio::fs::read(path).await
    }

    /// Remove a config. A missing file is not an error.
    pub async fn remove(&self, file_name: &str) -> io::Result<()> {
        let path = self.path_for(file_name)?;
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// The WireGuard server's config file, shared by all enrollments.
#[derive(Debug)]
pub struct ServerConfigFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ServerConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a peer entry unless the file already declares that public key.
    ///
    /// Returns whether anything was written.
    pub async fn append_peer(&self, peer: &ServerPeer) -> io::Result<bool> {
        let _guard = self.write_lock.lock().await;

        let existing = self.read_existing()?;
        if contains_peer(&existing, &peer.public_key) {
            return Ok(false);
        }

        self.append(render_server_peer(peer).as_bytes())?;
        Ok(true)
    }

    /// Append every peer the file does not declare yet.
    ///
    /// Returns how many peers were added.
    pub async fn reconcile(&self, peers: &[ServerPeer]) -> io::Result<usize> {
        let _guard = self.write_lock.lock().await;

        let existing = self.read_existing()?;
        let mut missing = String::new();
        let mut added = 0;
        for peer in peers {
            if !contains_peer(&existing, &peer.public_key) {
                missing.push_str(&render_server_peer(peer));
                added += 1;
            }
        }

        if added > 0 {
            self.append(missing.as_bytes())?;
        }
        Ok(added)
    }

    fn read_existing(&self) -> io::Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    /// One `write_all` on an append handle so entries never interleave.
    fn append(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path)?;
        file.write_all(bytes)?;
        file.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tunnelgate_wg::{KeyMaterialProvider, X25519Provider};

    fn peer(address: &str) -> ServerPeer {
        let material = X25519Provider.generate().unwrap();
        ServerPeer {
            public_key: material.public_key,
            preshared_key: material.preshared_key.clone(),
            client_address: address.parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_staged_config_appears_on_commit() {
        let dir = tempdir().unwrap();
        let configs = ClientConfigDir::new(dir.path().join("clients")).unwrap();

        let staged = configs.stage("fc002", b"[Interface]\n").unwrap();
        assert!(configs.read("fc002").await.is_err());

        let path = staged.commit().unwrap();
        assert_eq!(path, configs.dir().join("fc002"));
        assert_eq!(configs.read("fc002").await.unwrap(), b"[Interface]\n");

        #[cfg(unix)]
        {
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_dropped_stage_leaves_nothing() {
        let dir = tempdir().unwrap();
        let configs = ClientConfigDir::new(dir.path()).unwrap();

        drop(configs.stage("fc002", b"secret").unwrap());

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let configs = ClientConfigDir::new(dir.path()).unwrap();
        configs.write("fc002", b"x").unwrap();

        configs.remove("fc002").await.unwrap();
        configs.remove("fc002").await.unwrap();
        assert!(configs.read("fc002").await.is_err());
    }

    #[test]
    fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let configs = ClientConfigDir::new(dir.path()).unwrap();

        assert!(configs.path_for("../escape").is_err());
        assert!(configs.path_for("a/b").is_err());
        assert!(configs.path_for("").is_err());
        assert!(configs.path_for("..").is_err());
        assert!(configs.path_for("fc002").is_ok());
    }

    #[tokio::test]
    async fn test_append_is_idempotent() {
        let dir = tempdir().unwrap();
        let server = ServerConfigFile::new(dir.path().join("wg0.conf"));
        let lamp = peer("fc00::2");

        assert!(server.append_peer(&lamp).await.unwrap());
        assert!(!server.append_peer(&lamp).await.unwrap());

        let contents = fs::read_to_string(server.path()).unwrap();
        assert_eq!(contents.matches("[Peer]").count(), 1);
        assert!(contents.ends_with("AllowedIPs = fc00::2\n\n\n"));
    }

    #[tokio::test]
    async fn test_reconcile_restores_missing_peers() {
        let dir = tempdir().unwrap();
        let server = ServerConfigFile::new(dir.path().join("wg0.conf"));
        fs::write(server.path(), "[Interface]\nListenPort = 3411\n\n").unwrap();

        let lamp = peer("fc00::2");
        let kettle = peer("fc00::3");
        server.append_peer(&lamp).await.unwrap();

        let added = server.reconcile(&[lamp.clone(), kettle.clone()]).await.unwrap();
        assert_eq!(added, 1);
        assert_eq!(server.reconcile(&[lamp, kettle]).await.unwrap(), 0);

        let contents = fs::read_to_string(server.path()).unwrap();
        assert!(contents.starts_with("[Interface]\n"));
        assert_eq!(contents.matches("[Peer]").count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = tempdir().unwrap();
        let server = std::sync::Arc::new(ServerConfigFile::new(dir.path().join("wg0.conf")));

        let mut handles = Vec::new();
        for n in 0..16 {
            let server = server.clone();
            handles.push(tokio::spawn(async move {
                server.append_peer(&peer(&format!("fc00::{:x}", n + 2))).await.unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let contents = fs::read_to_string(server.path()).unwrap();
        let entries: Vec<&str> = contents.split("\n\n\n").filter(|s| !s.is_empty()).collect();
        assert_eq!(entries.len(), 16);
        for entry in entries {
            assert!(entry.starts_with("[Peer]\nPublicKey = "));
            assert_eq!(entry.lines().count(), 4);
        }
    }
}
