//! WireGuard config rendering.
//!
//! Rendering is pure: the same [`ConfigParams`] always produce byte-identical
//! output. Parameters go through [`ConfigParamsBuilder`], which refuses to
//! build while any field is missing.

use tunnelgate_core::NetworkAddress;
use zeroize::Zeroizing;

use crate::identity::{KeyMaterial, PresharedKey, PrivateKey, PublicKey};

/// Errors from assembling render input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// A required parameter was not supplied or was empty.
    #[error("missing config field: {0}")]
    MissingField(&'static str),
}

/// Complete input for one device's client config and server peer entry.
#[derive(Clone)]
pub struct ConfigParams {
    private_key: PrivateKey,
    public_key: PublicKey,
    preshared_key: PresharedKey,
    client_address: NetworkAddress,
    server_address: NetworkAddress,
    server_domain: String,
    server_public_key: PublicKey,
    server_port: u16,
    keepalive_seconds: u16,
}

impl ConfigParams {
    pub fn builder() -> ConfigParamsBuilder {
        ConfigParamsBuilder::default()
    }

    /// The server-side view of this device.
    pub fn server_peer(&self) -> ServerPeer {
        ServerPeer {
            public_key: self.public_key,
            preshared_key: self.preshared_key.clone(),
            client_address: self.client_address,
        }
    }
}

/// Builder for [`ConfigParams`].
#[derive(Default)]
pub struct ConfigParamsBuilder {
    private_key: Option<PrivateKey>,
    public_key: Option<PublicKey>,
    preshared_key: Option<PresharedKey>,
    client_address: Option<NetworkAddress>,
    server_address: Option<NetworkAddress>,
    server_domain: Option<String>,
    server_public_key: Option<PublicKey>,
    server_port: Option<u16>,
    keepalive_seconds: Option<u16>,
}

impl ConfigParamsBuilder {
    /// Set all three client keys at once.
    pub fn key_material(mut self, material: &KeyMaterial) -> Self {
        self.private_key = Some(material.private_key.clone());
        self.public_key = Some(material.public_key);
        self.preshared_key = Some(material.preshared_key.clone());
        self
    }

    pub fn client_address(mut self, address: NetworkAddress) -> Self {
        self.client_address = Some(address);
        self
    }

    pub fn server_address(mut self, address: NetworkAddress) -> Self {
        self.server_address = Some(address);
        self
    }

    pub fn server_domain(mut self, domain: impl Into<String>) -> Self {
        self.server_domain = Some(domain.into());
        self
    }

    pub fn server_public_key(mut self, key: PublicKey) -> Self {
        self.server_public_key = Some(key);
        self
    }

    pub fn server_port(mut self, port: u16) -> Self {
        self.server_port = Some(port);
        self
    }

    pub fn keepalive_seconds(mut self, seconds: u16) -> Self {
        self.keepalive_seconds = Some(seconds);
        self
    }

    /// # Errors
    ///
    /// Returns `TemplateError::MissingField` naming the first absent field.
    /// An empty domain or a zero port counts as absent.
    pub fn build(self) -> Result<ConfigParams, TemplateError> {
        let server_domain = self
            .server_domain
            .filter(|d| !d.trim().is_empty())
            .ok_or(TemplateError::MissingField("server_domain"))?;

        Ok(ConfigParams {
            private_key: self
                .private_key
                .ok_or(TemplateError::MissingField("private_key"))?,
            public_key: self
                .public_key
                .ok_or(TemplateError::MissingField("public_key"))?,
            preshared_key: self
                .preshared_key
                .ok_or(TemplateError::MissingField("preshared_key"))?,
            client_address: self
                .client_address
                .ok_or(TemplateError::MissingField("client_address"))?,
            server_address: self
                .server_address
                .ok_or(TemplateError::MissingField("server_address"))?,
            server_domain,
            server_public_key: self
                .server_public_key
                .ok_or(TemplateError::MissingField("server_public_key"))?,
            server_port: self
                .server_port
                .filter(|p| *p != 0)
                .ok_or(TemplateError::MissingField("server_port"))?,
            keepalive_seconds: self
                .keepalive_seconds
                .ok_or(TemplateError::MissingField("keepalive_seconds"))?,
        })
    }
}

/// A rendered client config. Contains the device's private key.
pub struct ClientConfig(Zeroizing<String>);

impl ClientConfig {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Take the rendered text, still zeroized on drop.
    pub fn into_inner(self) -> Zeroizing<String> {
        self.0
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClientConfig(..)")
    }
}

/// The server's peer entry for one device.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerPeer {
    pub public_key: PublicKey,
    pub preshared_key: PresharedKey,
    pub client_address: NetworkAddress,
}

impl std::fmt::Debug for ServerPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerPeer")
            .field("public_key", &self.public_key)
            .field("client_address", &self.client_address)
            .finish_non_exhaustive()
    }
}

/// Render the device-side config: its interface plus the server as peer.
pub fn render_client(params: &ConfigParams) -> ClientConfig {
    let out = format!(
        "[Interface]\n\
         PrivateKey = {private_key}\n\
         Address = {client_address}\n\
         \n\
         [Peer]\n\
         PublicKey = {server_public_key}\n\
         PresharedKey = {preshared_key}\n\
         Endpoint = {server_domain}:{server_port}\n\
         AllowedIPs = {server_address}\n\
         PersistentKeepalive = {keepalive}\n",
        private_key = params.private_key.to_base64().as_str(),
        client_address = params.client_address,
        server_public_key = params.server_public_key,
        preshared_key = params.preshared_key.to_base64().as_str(),
        server_domain = params.server_domain,
        server_port = params.server_port,
        server_address = params.server_address,
        keepalive = params.keepalive_seconds,
    );
    ClientConfig(Zeroizing::new(out))
}

/// Render the server-side peer entry, followed by two blank lines.
pub fn render_server_peer(peer: &ServerPeer) -> Zeroizing<String> {
    Zeroizing::new(format!(
        "{}\nPresharedKey = {}\nAllowedIPs = {}\n\n\n",
        peer_header(&peer.public_key),
        peer.preshared_key.to_base64().as_str(),
        peer.client_address,
    ))
}

fn peer_header(public_key: &PublicKey) -> String {
    format!("[Peer]\n{}", public_key_line(public_key))
}

/// The line that identifies a peer in the server config.
pub fn public_key_line(public_key: &PublicKey) -> String {
    format!("PublicKey = {public_key}")
}

/// Whether an existing server config already declares this peer.
pub fn contains_peer(server_config: &str, public_key: &PublicKey) -> bool {
    let needle = public_key_line(public_key);
    server_config.lines().any(|line| line.trim() == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{KeyMaterialProvider, X25519Provider};

    fn server_key() -> PublicKey {
        X25519Provider.generate().unwrap().public_key
    }

    fn complete_builder(material: &KeyMaterial, server: PublicKey) -> ConfigParamsBuilder {
        ConfigParams::builder()
            .key_material(material)
            .client_address("fc00::2".parse().unwrap())
            .server_address("fc00::1".parse().unwrap())
            .server_domain("vpn.example.com")
            .server_public_key(server)
            .server_port(3411)
            .keepalive_seconds(30)
    }

    #[test]
    fn client_config_layout() {
        let material = X25519Provider.generate().unwrap();
        let server = server_key();
        let params = complete_builder(&material, server).build().unwrap();

        let expected = format!(
            "[Interface]\nPrivateKey = {}\nAddress = fc00::2\n\n[Peer]\nPublicKey = {}\nPresharedKey = {}\nEndpoint = vpn.example.com:3411\nAllowedIPs = fc00::1\nPersistentKeepalive = 30\n",
            material.private_key.to_base64().as_str(),
            server,
            material.preshared_key.to_base64().as_str(),
        );
        assert_eq!(render_client(&params).as_str(), expected);
    }

    #[test]
    fn server_peer_layout() {
        let material = X25519Provider.generate().unwrap();
        let params = complete_builder(&material, server_key()).build().unwrap();

        let expected = format!(
            "[Peer]\nPublicKey = {}\nPresharedKey = {}\nAllowedIPs = fc00::2\n\n\n",
            material.public_key,
            material.preshared_key.to_base64().as_str(),
        );
        assert_eq!(render_server_peer(&params.server_peer()).as_str(), expected);
    }

    #[test]
    fn rendering_is_idempotent() {
        let material = X25519Provider.generate().unwrap();
        let params = complete_builder(&material, server_key()).build().unwrap();

        assert_eq!(render_client(&params).as_bytes(), render_client(&params).as_bytes());
        let peer = params.server_peer();
        assert_eq!(render_server_peer(&peer), render_server_peer(&peer));
    }

    #[test]
    fn missing_field_is_named() {
        let material = X25519Provider.generate().unwrap();
        let result = ConfigParams::builder()
            .key_material(&material)
            .client_address("fc00::2".parse().unwrap())
            .server_domain("vpn.example.com")
            .server_public_key(server_key())
            .server_port(3411)
            .keepalive_seconds(30)
            .build();
        assert!(matches!(
            result,
            Err(TemplateError::MissingField("server_address"))
        ));
    }

    #[test]
    fn empty_domain_and_zero_port_are_missing() {
        let material = X25519Provider.generate().unwrap();
        let server = server_key();

        let result = complete_builder(&material, server).server_domain("  ").build();
        assert!(matches!(
            result,
            Err(TemplateError::MissingField("server_domain"))
        ));

        let result = complete_builder(&material, server).server_port(0).build();
        assert!(matches!(
            result,
            Err(TemplateError::MissingField("server_port"))
        ));
    }

    #[test]
    fn contains_peer_matches_public_key_line() {
        let material = X25519Provider.generate().unwrap();
        let params = complete_builder(&material, server_key()).build().unwrap();
        let fragment = render_server_peer(&params.server_peer());

        let existing = format!("[Interface]\nListenPort = 3411\n\n{}", fragment.as_str());
        assert!(contains_peer(&existing, &material.public_key));
        assert!(!contains_peer(&existing, &server_key()));
    }

    #[test]
    fn client_config_debug_hides_contents() {
        let material = X25519Provider.generate().unwrap();
        let params = complete_builder(&material, server_key()).build().unwrap();
        let debug = format!("{:?}", render_client(&params));
        assert!(!debug.contains("PrivateKey"));
    }
}
