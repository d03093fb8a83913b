//! In-memory `MeshApi` fake shared by the collector tests.

use std::collections::HashMap;

use async_trait::async_trait;
use meshvista_api::{
    ApiError, Device, Eero, Forward, MeshApi, Network, NetworkDetails, Reservation, Result,
};

#[derive(Default)]
pub struct NetworkData {
    pub eeros: Vec<Eero>,
    pub devices: Vec<Device>,
    pub details: NetworkDetails,
    pub reservations: Vec<Reservation>,
    pub forwards: Vec<Forward>,
    pub fail: bool,
}

pub struct FakeApi {
    pub authenticated: bool,
    pub networks: Vec<Network>,
    pub data: HashMap<String, NetworkData>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            authenticated: true,
            networks: Vec::new(),
            data: HashMap::new(),
        }
    }
}

impl FakeApi {
    pub fn unauthenticated() -> Self {
        Self {
            authenticated: false,
            ..Self::default()
        }
    }

    pub fn with_network(mut self, name: &str) -> Self {
        let url = format!("/2.2/networks/{}", self.networks.len() + 1);
        self.networks.push(Network {
            url: url.clone(),
            name: Some(name.to_string()),
        });
        self.data.insert(url, NetworkData::default());
        self
    }

    /// Mutable access to the payloads of the network named `name`.
    pub fn network(&mut self, name: &str) -> &mut NetworkData {
        let url = self
            .networks
            .iter()
            .find(|n| n.name.as_deref() == Some(name))
            .map(|n| n.url.clone())
            .expect("network registered");
        self.data.get_mut(&url).expect("network data")
    }

    fn get(&self, network: &Network) -> Result<&NetworkData> {
        let data = self.data.get(&network.url).ok_or(ApiError::Status {
            status: 404,
            message: "no such network".into(),
        })?;
        if data.fail {
            return Err(ApiError::Status {
                status: 500,
                message: "upstream error".into(),
            });
        }
        Ok(data)
    }
}

#[async_trait]
impl MeshApi for FakeApi {
    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn networks(&self) -> Result<Vec<Network>> {
        Ok(self.networks.clone())
    }

    async fn eeros(&self, network: &Network) -> Result<Vec<Eero>> {
        Ok(self.get(network)?.eeros.clone())
    }

    async fn devices(&self, network: &Network) -> Result<Vec<Device>> {
        Ok(self.get(network)?.devices.clone())
    }

    async fn network_details(&self, network: &Network) -> Result<NetworkDetails> {
        Ok(self.get(network)?.details.clone())
    }

    async fn reservations(&self, network: &Network) -> Result<Vec<Reservation>> {
        Ok(self.get(network)?.reservations.clone())
    }

    async fn forwards(&self, network: &Network) -> Result<Vec<Forward>> {
        Ok(self.get(network)?.forwards.clone())
    }
}
