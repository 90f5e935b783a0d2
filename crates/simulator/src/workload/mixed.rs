//! Read/write/static/API request mix over a bounded key space.

use crate::config::WorkloadConfig;
use crate::workload::WorkloadGenerator;
use sysdesign_components::load_balancer::FORWARDED_FOR_HEADER;
use sysdesign_types::{Request, RequestId, RequestType};

/// Generates requests following a [`WorkloadConfig`] mix.
///
/// Request ids are sequential per generator; keys, users and regions are
/// drawn from the supplied rng.
pub struct MixedWorkload {
    config: WorkloadConfig,
    next_id: u64,
}

impl MixedWorkload {
    pub fn new(config: WorkloadConfig) -> Self {
        Self { config, next_id: 0 }
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Number of requests generated so far.
    pub fn generated(&self) -> u64 {
        self.next_id
    }

    fn kind_for(&self, roll: f64) -> (RequestType, &'static str) {
        let c = &self.config;
        if roll < c.read_ratio {
            (RequestType::Read, "/items/")
        } else if roll < c.read_ratio + c.write_ratio {
            (RequestType::Write, "/items/")
        } else if roll < c.read_ratio + c.write_ratio + c.static_ratio {
            (RequestType::Read, "/static/asset-")
        } else {
            (RequestType::Api, "/api/v1/items/")
        }
    }
}

impl WorkloadGenerator for MixedWorkload {
    fn generate_one(&mut self, rng: &mut impl rand::Rng) -> Request {
        let id = RequestId(self.next_id);
        self.next_id += 1;

        let (kind, prefix) = self.kind_for(rng.gen::<f64>());
        let key = rng.gen_range(0..self.config.key_space.max(1));
        let user = rng.gen_range(0..self.config.users.max(1));
        let region = self.config.regions.select(&mut *rng).to_string();

        let mut request = Request::new(id, kind, format!("{prefix}{key}"))
            .with_region(region)
            .with_user(format!("user-{user}"))
            .with_header(
                FORWARDED_FOR_HEADER,
                format!("10.{}.{}.{}", (user >> 16) & 0xff, (user >> 8) & 0xff, user & 0xff),
            );
        if kind == RequestType::Write {
            request = request.with_data_size(self.config.payload_size);
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use sysdesign_game::RegionWeights;
    use sysdesign_types::regions;

    fn batch(config: WorkloadConfig, count: usize) -> Vec<Request> {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        MixedWorkload::new(config).generate_batch(count, &mut rng)
    }

    #[test]
    fn test_same_seed_same_requests() {
        let a = batch(WorkloadConfig::new(), 50);
        let b = batch(WorkloadConfig::new(), 50);
        let paths = |requests: &[Request]| requests.iter().map(|r| r.path.clone()).collect::<Vec<_>>();
        assert_eq!(paths(&a), paths(&b));
        assert_eq!(a[49].id, RequestId(49));
    }

    #[test]
    fn test_mix_and_payloads() {
        let config = WorkloadConfig::new()
            .with_mix(0.5, 0.25)
            .with_static_ratio(0.25)
            .with_payload_size(512)
            .with_key_space(10);
        let requests = batch(config, 4_000);

        let writes: Vec<_> = requests.iter().filter(|r| r.is_write()).collect();
        assert!((800..1_200).contains(&writes.len()), "writes: {}", writes.len());
        assert!(writes.iter().all(|r| r.data_size == 512));

        let statics = requests
            .iter()
            .filter(|r| r.path.starts_with("/static/"))
            .count();
        assert!((800..1_200).contains(&statics), "statics: {statics}");
        assert!(requests.iter().all(|r| r.kind != RequestType::Api));
        assert!(requests
            .iter()
            .all(|r| r.headers.contains_key(FORWARDED_FOR_HEADER)));
    }

    #[test]
    fn test_regions_follow_weights() {
        let config = WorkloadConfig::new().with_regions(RegionWeights::new().with(regions::ASIA, 1.0));
        assert!(batch(config, 20).iter().all(|r| r.region == regions::ASIA));
    }
}
