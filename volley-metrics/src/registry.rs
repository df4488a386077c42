use dashmap::DashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::key::{Interner, KeyId};
use crate::kind::{MetricKind, Sample};
use crate::snapshot::{MetricSnapshot, RateValue, SeriesSnapshot, SeriesValue, Snapshot};
use crate::tags::TagSet;
use crate::trend::TrendValue;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: KeyId,
    kind: MetricKind,
}

#[derive(Debug)]
enum SeriesStorage {
    Counter(AtomicU64),
    Gauge(AtomicI64),
    Rate { hits: AtomicU64, total: AtomicU64 },
    Trend(Mutex<TrendValue>),
}

impl SeriesStorage {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(AtomicU64::new(0)),
            MetricKind::Gauge => Self::Gauge(AtomicI64::new(0)),
            MetricKind::Rate => Self::Rate {
                hits: AtomicU64::new(0),
                total: AtomicU64::new(0),
            },
            MetricKind::Trend => Self::Trend(Mutex::new(TrendValue::default())),
        }
    }

    /// Returns `false` when the sample does not match the series kind.
    fn apply(&self, sample: Sample) -> bool {
        match (self, sample) {
            (Self::Counter(c), Sample::Counter(v)) => {
                c.fetch_add(v, Ordering::Relaxed);
            }
            (Self::Gauge(g), Sample::Gauge(v)) => g.store(v, Ordering::Relaxed),
            (Self::Rate { hits, total }, Sample::Rate(hit)) => {
                if hit {
                    hits.fetch_add(1, Ordering::Relaxed);
                }
                total.fetch_add(1, Ordering::Relaxed);
            }
            (Self::Trend(t), Sample::Trend(v)) => t.lock().record(v),
            _ => return false,
        }
        true
    }

    fn read(&self) -> SeriesValue {
        match self {
            Self::Counter(c) => SeriesValue::Counter(c.load(Ordering::Relaxed)),
            Self::Gauge(g) => SeriesValue::Gauge(g.load(Ordering::Relaxed)),
            Self::Rate { hits, total } => SeriesValue::Rate(RateValue {
                hits: hits.load(Ordering::Relaxed),
                total: total.load(Ordering::Relaxed),
            }),
            Self::Trend(t) => SeriesValue::Trend(t.lock().clone()),
        }
    }
}

/// Name-keyed metric store.
///
/// Lock order is `defs` before `series`; writers resolve the metric kind before touching series
/// storage so they never hold a series shard while waiting on `defs`.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    series: DashMap<MetricId, DashMap<TagSet, SeriesStorage>>,
    // Shared by writers, exclusive for snapshot and reset.
    gate: RwLock<()>,
}

impl Registry {
    /// Registers `name` as `kind`. Registering the same name and kind again returns the
    /// existing id.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        let name_id = self.interner.intern(name);

        let mut defs = self.defs.write();
        if let Some((idx, def)) = defs.iter().enumerate().find(|(_, d)| d.name == name_id) {
            if def.kind != kind {
                return Err(Error::KindMismatch {
                    name: name.to_string(),
                    registered: def.kind,
                    requested: kind,
                });
            }
            return Ok(MetricId(idx as u32));
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name_id,
            kind,
        });
        self.series.insert(id, DashMap::new());
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let name_id = self.interner.lookup(name)?;
        let defs = self.defs.read();
        defs.iter()
            .enumerate()
            .find(|(_, d)| d.name == name_id)
            .map(|(idx, d)| (MetricId(idx as u32), d.kind))
    }

    pub fn kind(&self, id: MetricId) -> Option<MetricKind> {
        self.defs.read().get(id.0 as usize).map(|d| d.kind)
    }

    pub fn name(&self, id: MetricId) -> Option<Arc<str>> {
        let name = self.defs.read().get(id.0 as usize)?.name;
        Some(self.interner.resolve(name))
    }

    pub fn tags(&self, pairs: &[(&str, &str)]) -> TagSet {
        let interned: SmallVec<[(KeyId, KeyId); 4]> = pairs
            .iter()
            .map(|(k, v)| (self.interner.intern(k), self.interner.intern(v)))
            .collect();
        TagSet::from_unsorted(interned)
    }

    /// Records into the untagged series of a registered metric.
    pub fn record(&self, name: &str, sample: Sample) -> Result<()> {
        let (id, _) = self
            .lookup(name)
            .ok_or_else(|| Error::UnknownMetric(name.to_string()))?;
        self.record_series(id, &TagSet::default(), sample)
    }

    pub fn record_series(&self, id: MetricId, tags: &TagSet, sample: Sample) -> Result<()> {
        let _shared = self.gate.read();
        self.apply(id, tags, sample)
    }

    pub(crate) fn shared_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read()
    }

    pub(crate) fn apply(&self, id: MetricId, tags: &TagSet, sample: Sample) -> Result<()> {
        let kind = self
            .kind(id)
            .ok_or_else(|| Error::UnknownMetric(format!("#{}", id.0)))?;
        if kind != sample.kind() {
            return Err(Error::SampleMismatch {
                name: self.name(id).map(|n| n.to_string()).unwrap_or_default(),
                kind,
                sample: sample.kind(),
            });
        }

        let Some(series) = self.series.get(&id) else {
            return Err(Error::UnknownMetric(format!("#{}", id.0)));
        };
        if let Some(storage) = series.get(tags) {
            storage.apply(sample);
            return Ok(());
        }
        series
            .entry(tags.clone())
            .or_insert_with(|| SeriesStorage::new(kind))
            .apply(sample);
        Ok(())
    }

    /// Drops every recorded series. Definitions are kept.
    pub fn reset(&self) {
        let _exclusive = self.gate.write();
        for entry in self.series.iter() {
            entry.value().clear();
        }
    }

    /// Point-in-time copy of every metric. Never observes a half-applied [`crate::Batch`].
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_where(|_| true)
    }

    /// Like [`Registry::snapshot`], restricted to the named metrics.
    pub fn snapshot_of(&self, names: &[&str]) -> Snapshot {
        self.snapshot_where(|name| names.contains(&name))
    }

    fn snapshot_where(&self, keep: impl Fn(&str) -> bool) -> Snapshot {
        let _exclusive = self.gate.write();
        let defs = self.defs.read();

        let mut metrics = Vec::with_capacity(defs.len());
        for (idx, def) in defs.iter().enumerate() {
            let name = self.interner.resolve(def.name);
            if !keep(&name) {
                continue;
            }
            let mut series = Vec::new();
            if let Some(map) = self.series.get(&MetricId(idx as u32)) {
                for s in map.iter() {
                    let mut tags: Vec<(String, String)> = s
                        .key()
                        .iter()
                        .map(|(k, v)| {
                            (
                                self.interner.resolve(k).to_string(),
                                self.interner.resolve(v).to_string(),
                            )
                        })
                        .collect();
                    tags.sort();
                    series.push(SeriesSnapshot {
                        tags,
                        value: s.value().read(),
                    });
                }
            }
            series.sort_by(|a, b| a.tags.cmp(&b.tags));

            metrics.push(MetricSnapshot {
                name: name.to_string(),
                kind: def.kind,
                series,
            });
        }

        Snapshot::new(metrics)
    }
}
