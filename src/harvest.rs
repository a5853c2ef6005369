//! Target discovery for autonomous recon waves.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

/// Topics a wave can be aimed at.
pub const TOPICS: &[&str] = &[
    "Industrial Control Systems",
    "Unprotected Webcams",
    "Database Servers",
    "IoT Sensors",
    "Cloud Infrastructure",
    "Public Web Servers",
    "SSH Gateways",
    "Development Boards",
];

/// Pick a topic uniformly from `catalog`. `None` only for an empty catalog.
pub fn pick_topic<'a, R: Rng + ?Sized>(catalog: &[&'a str], rng: &mut R) -> Option<&'a str> {
    catalog.choose(rng).copied()
}

/// Produces candidate addresses for a topic.
///
/// May be slow; must return a finite list. An `Err` is treated by the recon
/// loop as "no targets this wave".
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn harvest(&self, topic: &str) -> anyhow::Result<Vec<String>>;
}

/// Stand-in for a device search engine: random IPv4 addresses after a fixed delay.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    pub batch_size: usize,
    pub delay: Duration,
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self {
            batch_size: 5,
            delay: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl TargetSource for SimulatedSource {
    async fn harvest(&self, topic: &str) -> anyhow::Result<Vec<String>> {
        info!(topic, "gathering global targets");
        tokio::time::sleep(self.delay).await;
        let mut rng = rand::thread_rng();
        let batch = (0..self.batch_size)
            .map(|_| {
                Ipv4Addr::new(
                    rng.gen_range(1..=255),
                    rng.gen_range(1..=255),
                    rng.gen_range(1..=255),
                    rng.gen_range(1..=255),
                )
                .to_string()
            })
            .collect();
        Ok(batch)
    }
}

/// A fixed list, returned for every topic. Useful for pointing recon at a known range.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    pub addresses: Vec<String>,
}

#[async_trait]
impl TargetSource for StaticSource {
    async fn harvest(&self, _topic: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.addresses.clone())
    }
}
