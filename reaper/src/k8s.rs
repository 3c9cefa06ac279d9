//! Typed access to the cluster. Control loops only see the [`ClusterApi`]
//! trait so they can run against the in-memory fake in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMap, LimitRange, LimitRangeItem, LimitRangeSpec, Namespace, Pod, ResourceQuota,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams},
};

use crate::error::Error;
use crate::types::{
    CONFIG_KEY, CONFIG_MAP_NAME, CONFIG_NAMESPACE, LIMIT_RANGE_NAME, MANAGER, NsConfig,
    POD_LIMIT, POD_REQUEST,
};

/// Hard and used memory of a resource quota, in bytes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuotaSnapshot {
    pub hard_bytes: i64,
    pub used_bytes: i64,
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn server_version(&self) -> Result<String, Error>;
    async fn list_namespaces(&self) -> Result<Vec<String>, Error>;
    async fn phase_of(&self, ns: &str) -> Result<String, Error>;
    /// Whether the namespace still exists. Transient lookup failures report
    /// `true` so callers never evict on an API blip.
    async fn exists(&self, ns: &str) -> bool;
    async fn delete_pods(&self, ns: &str) -> Result<(), Error>;
    async fn get_quota(&self, ns: &str, name: &str) -> Result<Option<QuotaSnapshot>, Error>;
    async fn set_quota(&self, ns: &str, name: &str, bytes: i64) -> Result<(), Error>;
    async fn has_quota(&self, ns: &str, name: &str) -> bool;
    async fn delete_quota(&self, ns: &str, name: &str) -> Result<(), Error>;
    async fn ensure_limit_range(&self, ns: &str) -> Result<(), Error>;
    async fn get_settings(&self) -> Result<Vec<NsConfig>, Error>;
    async fn save_settings(&self, configs: &[NsConfig]) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct K8sCluster {
    client: Client,
}

impl K8sCluster {
    pub async fn connect(in_cluster: bool) -> anyhow::Result<K8sCluster> {
        let config = if in_cluster {
            kube::Config::incluster()?
        } else {
            kube::Config::infer().await?
        };
        Ok(K8sCluster {
            client: Client::try_from(config)?,
        })
    }

    fn quotas(&self, ns: &str) -> Api<ResourceQuota> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterApi for K8sCluster {
    async fn server_version(&self) -> Result<String, Error> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, Error> {
        let list = self.namespaces().list(&ListParams::default()).await?;
        Ok(list.items.iter().map(|ns| ns.name_any()).collect())
    }

    async fn phase_of(&self, ns: &str) -> Result<String, Error> {
        let Some(namespace) = self.namespaces().get_opt(ns).await? else {
            return Err(Error::NotFound(ns.to_string()));
        };
        Ok(namespace
            .status
            .and_then(|status| status.phase)
            .unwrap_or_default())
    }

    async fn exists(&self, ns: &str) -> bool {
        !matches!(self.namespaces().get_opt(ns).await, Ok(None))
    }

    async fn delete_pods(&self, ns: &str) -> Result<(), Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        pods.delete_collection(&DeleteParams::default(), &ListParams::default())
            .await?;
        Ok(())
    }

    async fn get_quota(&self, ns: &str, name: &str) -> Result<Option<QuotaSnapshot>, Error> {
        let Some(rq) = self.quotas(ns).get_opt(name).await? else {
            return Ok(None);
        };
        let hard_bytes = rq
            .spec
            .as_ref()
            .and_then(|spec| spec.hard.as_ref())
            .and_then(|hard| hard.get("memory"))
            .map(mem_bytes)
            .unwrap_or(0);
        let used_bytes = rq
            .status
            .as_ref()
            .and_then(|status| status.used.as_ref())
            .and_then(|used| used.get("memory"))
            .map(mem_bytes)
            .unwrap_or(0);
        Ok(Some(QuotaSnapshot {
            hard_bytes,
            used_bytes,
        }))
    }

    async fn set_quota(&self, ns: &str, name: &str, bytes: i64) -> Result<(), Error> {
        // Server-side apply handles both creation and reconciliation.
        let quota = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ResourceQuota",
            "metadata": { "name": name, "namespace": ns },
            "spec": { "hard": { "memory": format_binary_si(bytes) } },
        });
        self.quotas(ns)
            .patch(name, &PatchParams::apply(MANAGER).force(), &Patch::Apply(&quota))
            .await?;
        Ok(())
    }

    async fn has_quota(&self, ns: &str, name: &str) -> bool {
        matches!(self.quotas(ns).get_opt(name).await, Ok(Some(_)))
    }

    async fn delete_quota(&self, ns: &str, name: &str) -> Result<(), Error> {
        match self.quotas(ns).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn ensure_limit_range(&self, ns: &str) -> Result<(), Error> {
        if self.phase_of(ns).await? != "Active" {
            return Ok(());
        }
        let ranges: Api<LimitRange> = Api::namespaced(self.client.clone(), ns);
        if ranges.get_opt(LIMIT_RANGE_NAME).await?.is_some() {
            return Ok(());
        }
        let range = LimitRange {
            metadata: ObjectMeta {
                name: Some(LIMIT_RANGE_NAME.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            spec: Some(LimitRangeSpec {
                limits: vec![LimitRangeItem {
                    type_: "Container".to_string(),
                    default: Some(mem_map(POD_LIMIT)),
                    default_request: Some(mem_map(POD_REQUEST)),
                    ..Default::default()
                }],
            }),
        };
        match ranges.create(&PostParams::default(), &range).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn get_settings(&self) -> Result<Vec<NsConfig>, Error> {
        let maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), CONFIG_NAMESPACE);
        let Some(cm) = maps.get_opt(CONFIG_MAP_NAME).await? else {
            return Ok(Vec::new());
        };
        let Some(raw) = cm.data.as_ref().and_then(|data| data.get(CONFIG_KEY)) else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_str(raw)?)
    }

    async fn save_settings(&self, configs: &[NsConfig]) -> Result<(), Error> {
        let maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), CONFIG_NAMESPACE);
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(CONFIG_MAP_NAME.to_string()),
                namespace: Some(CONFIG_NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                CONFIG_KEY.to_string(),
                serde_json::to_string(configs)?,
            )])),
            ..Default::default()
        };
        // Update an existing document, falling back to creation
        if maps
            .replace(CONFIG_MAP_NAME, &PostParams::default(), &cm)
            .await
            .is_err()
        {
            maps.create(&PostParams::default(), &cm).await?;
        }
        Ok(())
    }
}

fn mem_map(quantity: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([("memory".to_string(), Quantity(quantity.to_string()))])
}

/// Parse a memory quantity into bytes. Unparseable values count as 0.
pub(crate) fn mem_bytes(q: &Quantity) -> i64 {
    let s = q.0.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '-')
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let value: i64 = number.parse().unwrap_or(0);
    match suffix {
        "" => value,
        "Ki" => value.saturating_mul(1 << 10),
        "Mi" => value.saturating_mul(1 << 20),
        "Gi" => value.saturating_mul(1 << 30),
        "Ti" => value.saturating_mul(1 << 40),
        "Pi" => value.saturating_mul(1 << 50),
        "Ei" => value.saturating_mul(1 << 60),
        "k" => value.saturating_mul(1_000),
        "M" => value.saturating_mul(1_000_000),
        "G" => value.saturating_mul(1_000_000_000),
        "T" => value.saturating_mul(1_000_000_000_000),
        "P" => value.saturating_mul(1_000_000_000_000_000),
        "E" => value.saturating_mul(1_000_000_000_000_000_000),
        "m" => value / 1_000,
        _ => 0,
    }
}

/// Format bytes the way the apiserver canonicalizes binary quantities.
pub(crate) fn format_binary_si(bytes: i64) -> String {
    const KI: i64 = 1 << 10;
    const MI: i64 = 1 << 20;
    const GI: i64 = 1 << 30;
    if bytes != 0 && bytes % GI == 0 {
        format!("{}Gi", bytes / GI)
    } else if bytes != 0 && bytes % MI == 0 {
        format!("{}Mi", bytes / MI)
    } else if bytes != 0 && bytes % KI == 0 {
        format!("{}Ki", bytes / KI)
    } else {
        bytes.to_string()
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::types::QUOTA_NAME;

    /// In-memory cluster used by the loop and handler tests.
    #[derive(Default)]
    pub struct FakeCluster {
        namespaces: Mutex<BTreeMap<String, String>>,
        quotas: Mutex<BTreeMap<(String, String), i64>>,
        used: Mutex<BTreeMap<String, i64>>,
        pod_deletes: Mutex<Vec<String>>,
        limit_ranges: Mutex<BTreeSet<String>>,
        seed: Mutex<Vec<NsConfig>>,
        saved: Mutex<Vec<Vec<NsConfig>>>,
        pub fail_save: AtomicBool,
        pub save_attempts: AtomicUsize,
    }

    impl FakeCluster {
        pub fn with_namespace(ns: &str) -> Self {
            let fake = FakeCluster::default();
            fake.insert_namespace(ns, "Active");
            fake
        }

        pub fn insert_namespace(&self, ns: &str, phase: &str) {
            self.namespaces
                .lock()
                .unwrap()
                .insert(ns.to_string(), phase.to_string());
        }

        pub fn remove_namespace(&self, ns: &str) {
            self.namespaces.lock().unwrap().remove(ns);
        }

        pub fn insert_quota(&self, ns: &str, name: &str, bytes: i64) {
            self.quotas
                .lock()
                .unwrap()
                .insert((ns.to_string(), name.to_string()), bytes);
        }

        pub fn set_used(&self, ns: &str, bytes: i64) {
            self.used.lock().unwrap().insert(ns.to_string(), bytes);
        }

        pub fn hard_bytes(&self, ns: &str, name: &str) -> Option<i64> {
            self.quotas
                .lock()
                .unwrap()
                .get(&(ns.to_string(), name.to_string()))
                .copied()
        }

        pub fn deleted_pods(&self) -> Vec<String> {
            self.pod_deletes.lock().unwrap().clone()
        }

        pub fn has_limit_range(&self, ns: &str) -> bool {
            self.limit_ranges.lock().unwrap().contains(ns)
        }

        pub fn seed_settings(&self, configs: Vec<NsConfig>) {
            *self.seed.lock().unwrap() = configs;
        }

        pub fn saved(&self) -> Vec<Vec<NsConfig>> {
            self.saved.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClusterApi for FakeCluster {
        async fn server_version(&self) -> Result<String, Error> {
            Ok("v1.fake".to_string())
        }

        async fn list_namespaces(&self) -> Result<Vec<String>, Error> {
            Ok(self.namespaces.lock().unwrap().keys().cloned().collect())
        }

        async fn phase_of(&self, ns: &str) -> Result<String, Error> {
            self.namespaces
                .lock()
                .unwrap()
                .get(ns)
                .cloned()
                .ok_or_else(|| Error::NotFound(ns.to_string()))
        }

        async fn exists(&self, ns: &str) -> bool {
            self.namespaces.lock().unwrap().contains_key(ns)
        }

        async fn delete_pods(&self, ns: &str) -> Result<(), Error> {
            self.pod_deletes.lock().unwrap().push(ns.to_string());
            Ok(())
        }

        async fn get_quota(&self, ns: &str, name: &str) -> Result<Option<QuotaSnapshot>, Error> {
            let hard = self.hard_bytes(ns, name);
            Ok(hard.map(|hard_bytes| QuotaSnapshot {
                hard_bytes,
                used_bytes: if name == QUOTA_NAME {
                    self.used.lock().unwrap().get(ns).copied().unwrap_or(0)
                } else {
                    0
                },
            }))
        }

        async fn set_quota(&self, ns: &str, name: &str, bytes: i64) -> Result<(), Error> {
            self.insert_quota(ns, name, bytes);
            Ok(())
        }

        async fn has_quota(&self, ns: &str, name: &str) -> bool {
            self.hard_bytes(ns, name).is_some()
        }

        async fn delete_quota(&self, ns: &str, name: &str) -> Result<(), Error> {
            self.quotas
                .lock()
                .unwrap()
                .remove(&(ns.to_string(), name.to_string()));
            Ok(())
        }

        async fn ensure_limit_range(&self, ns: &str) -> Result<(), Error> {
            if self.phase_of(ns).await? == "Active" {
                self.limit_ranges.lock().unwrap().insert(ns.to_string());
            }
            Ok(())
        }

        async fn get_settings(&self) -> Result<Vec<NsConfig>, Error> {
            let saved = self.saved.lock().unwrap();
            Ok(match saved.last() {
                Some(latest) => latest.clone(),
                None => self.seed.lock().unwrap().clone(),
            })
        }

        async fn save_settings(&self, configs: &[NsConfig]) -> Result<(), Error> {
            self.save_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_save.load(Ordering::SeqCst) {
                return Err(Error::NotFound(CONFIG_MAP_NAME.to_string()));
            }
            self.saved.lock().unwrap().push(configs.to_vec());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GIB;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn parses_memory_quantities() {
        assert_eq!(mem_bytes(&q("0")), 0);
        assert_eq!(mem_bytes(&q("10Gi")), 10 * GIB);
        assert_eq!(mem_bytes(&q("512Mi")), 512 << 20);
        assert_eq!(mem_bytes(&q("1536Ki")), 1536 << 10);
        assert_eq!(mem_bytes(&q("1000000")), 1_000_000);
        assert_eq!(mem_bytes(&q("2G")), 2_000_000_000);
        assert_eq!(mem_bytes(&q("nonsense")), 0);
    }

    #[test]
    fn formats_binary_quantities() {
        assert_eq!(format_binary_si(0), "0");
        assert_eq!(format_binary_si(10 * GIB), "10Gi");
        assert_eq!(format_binary_si(512 << 20), "512Mi");
        assert_eq!(format_binary_si(3 << 10), "3Ki");
        assert_eq!(format_binary_si(1234), "1234");
    }

    #[test]
    fn quantity_round_trip_through_bytes() {
        for gib in [1, 10, 32] {
            assert_eq!(mem_bytes(&q(&format_binary_si(gib * GIB))), gib * GIB);
        }
    }
}
