//! Read-side translation of the current snapshot into metric families, and
//! their Prometheus text exposition.
//!
//! Every scrape rebuilds the families from whatever [`SnapshotStore::current`]
//! returns; nothing here touches a cycle that is still running.
use crate::histogram::{Histogram, DURATION_BUCKETS};
use crate::store::{Published, SnapshotStore};
use crate::types::{PortState, Target};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix shared by every exported metric.
pub const NAMESPACE: &str = "port_scan";

/// Content type of the text exposition format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Gauge,
    Histogram,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Gauge => "gauge",
            Kind::Histogram => "histogram",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Gauge(f64),
    Histogram(Histogram),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Vec<(&'static str, String)>,
    pub value: Value,
}

impl Sample {
    fn gauge(labels: Vec<(&'static str, String)>, value: f64) -> Self {
        Self {
            labels,
            value: Value::Gauge(value),
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Family {
    pub name: String,
    pub help: &'static str,
    pub kind: Kind,
    pub samples: Vec<Sample>,
}

impl Family {
    fn new(name: &str, help: &'static str, kind: Kind) -> Self {
        Self {
            name: format!("{NAMESPACE}_{name}"),
            help,
            kind,
            samples: Vec::new(),
        }
    }
}

/// Builds metric families from the snapshot store on demand.
#[derive(Debug, Clone)]
pub struct MetricsTranslator {
    store: SnapshotStore,
}

impl MetricsTranslator {
    pub fn new(store: SnapshotStore) -> Self {
        Self { store }
    }

    /// One scrape's worth of families. Before the first snapshot only the age is reported.
    pub fn collect(&self) -> Vec<Family> {
        let current = self.store.current();
        let (mut out, age_secs) = match current.as_deref() {
            Some(published) => (snapshot_families(published), published.age().as_secs_f64()),
            None => (Vec::new(), f64::INFINITY),
        };

        let mut age = Family::new("age_seconds", "Age of the last scan in seconds.", Kind::Gauge);
        age.samples.push(Sample::gauge(Vec::new(), age_secs));
        out.push(age);
        out
    }

    /// Text exposition of [`collect`](Self::collect).
    pub fn render(&self) -> String {
        TextFormat(&self.collect()).to_string()
    }
}

fn target_labels(t: &Target) -> Vec<(&'static str, String)> {
    vec![
        ("pod_name", t.name.clone()),
        ("pod_namespace", t.namespace.clone()),
        ("pod_ip", t.ip.clone()),
        ("pod_node", t.node.clone()),
    ]
}

fn snapshot_families(published: &Published) -> Vec<Family> {
    let snap = &published.snapshot;

    let mut targets = Family::new("targets", "Number of scanned targets.", Kind::Gauge);
    targets
        .samples
        .push(Sample::gauge(Vec::new(), snap.targets.len() as f64));

    let mut pods = Family::new(
        "pods",
        "Number of scanned pods by namespace and node.",
        Kind::Gauge,
    );
    let mut per_group: BTreeMap<(&str, &str), u64> = BTreeMap::new();
    for report in &snap.targets {
        *per_group
            .entry((report.target.namespace.as_str(), report.target.node.as_str()))
            .or_default() += 1;
    }
    for ((namespace, node), n) in &per_group {
        pods.samples.push(Sample::gauge(
            vec![
                ("pod_namespace", namespace.to_string()),
                ("pod_node", node.to_string()),
            ],
            *n as f64,
        ));
    }

    let mut ports = Family::new(
        "ports",
        "Number of scanned ports by protocol and state.",
        Kind::Gauge,
    );
    for (protocol, counts) in &snap.by_protocol {
        for state in PortState::ALL {
            ports.samples.push(Sample::gauge(
                vec![
                    ("port_protocol", protocol.to_string()),
                    ("port_state", state.to_string()),
                ],
                counts.get(state) as f64,
            ));
        }
    }

    let mut target_ports = Family::new(
        "target_ports",
        "Number of scanned ports by pod, namespace, IP, node and state.",
        Kind::Gauge,
    );
    let mut target_took = Family::new(
        "target_took_seconds",
        "Time until the last probe of a pod finished, by pod, namespace, IP and node.",
        Kind::Gauge,
    );
    let mut took_groups: BTreeMap<(&str, &str), Vec<f64>> = BTreeMap::new();
    for report in &snap.targets {
        for state in PortState::ALL {
            let mut labels = target_labels(&report.target);
            labels.push(("port_state", state.to_string()));
            target_ports
                .samples
                .push(Sample::gauge(labels, report.counts.get(state) as f64));
        }
        let took = report.took.as_secs_f64();
        target_took
            .samples
            .push(Sample::gauge(target_labels(&report.target), took));
        took_groups
            .entry((report.target.namespace.as_str(), report.target.node.as_str()))
            .or_default()
            .push(took);
    }

    let mut target_took_hist = Family::new(
        "target_duration_seconds",
        "Per-pod scan time in seconds by namespace and node.",
        Kind::Histogram,
    );
    for ((namespace, node), tooks) in took_groups {
        target_took_hist.samples.push(Sample {
            labels: vec![
                ("pod_namespace", namespace.to_string()),
                ("pod_node", node.to_string()),
            ],
            value: Value::Histogram(Histogram::from_samples(&DURATION_BUCKETS, tooks)),
        });
    }

    // Capped by the number of open ports, not by the ports scanned.
    let mut open_ports = Family::new(
        "open_ports",
        "Open ports by pod, namespace, IP, node, protocol and port.",
        Kind::Gauge,
    );
    for r in snap.open_ports() {
        let mut labels = target_labels(&r.target);
        labels.push(("port_protocol", r.protocol.to_string()));
        labels.push(("port_number", r.port.to_string()));
        open_ports.samples.push(Sample::gauge(labels, 1.0));
    }

    let secs = snap.duration.as_secs_f64();
    let mut last_duration = Family::new(
        "last_duration_seconds",
        "Duration of the last scan cycle in seconds.",
        Kind::Gauge,
    );
    last_duration.samples.push(Sample::gauge(Vec::new(), secs));

    let mut duration = Family::new(
        "duration_seconds",
        "Scan cycle duration in seconds.",
        Kind::Histogram,
    );
    duration.samples.push(Sample {
        labels: Vec::new(),
        value: Value::Histogram(Histogram::from_samples(&DURATION_BUCKETS, [secs])),
    });

    let mut complete = Family::new(
        "complete",
        "Whether the last scan cycle probed every port of every target (1) or was cut short (0).",
        Kind::Gauge,
    );
    complete
        .samples
        .push(Sample::gauge(Vec::new(), if snap.complete { 1.0 } else { 0.0 }));

    vec![
        targets,
        pods,
        ports,
        target_ports,
        open_ports,
        target_took,
        target_took_hist,
        last_duration,
        duration,
        complete,
    ]
}

/// Prometheus text exposition (format 0.0.4) of a set of families.
pub struct TextFormat<'a>(pub &'a [Family]);

impl fmt::Display for TextFormat<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for family in self.0 {
            writeln!(f, "# HELP {} {}", family.name, family.help)?;
            writeln!(f, "# TYPE {} {}", family.name, family.kind.as_str())?;
            for sample in &family.samples {
                match &sample.value {
                    Value::Gauge(v) => {
                        writeln!(f, "{}{} {}", family.name, Labels(&sample.labels, None), Num(*v))?;
                    }
                    Value::Histogram(h) => write_histogram(f, &family.name, &sample.labels, h)?,
                }
            }
        }
        Ok(())
    }
}

fn write_histogram(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    labels: &[(&'static str, String)],
    h: &Histogram,
) -> fmt::Result {
    for (bound, count) in h.buckets() {
        let le = Num(bound).to_string();
        writeln!(f, "{name}_bucket{} {count}", Labels(labels, Some(&le)))?;
    }
    writeln!(f, "{name}_bucket{} {}", Labels(labels, Some("+Inf")), h.count())?;
    writeln!(f, "{name}_sum{} {}", Labels(labels, None), Num(h.sum()))?;
    writeln!(f, "{name}_count{} {}", Labels(labels, None), h.count())
}

struct Labels<'a>(&'a [(&'static str, String)], Option<&'a str>);

impl fmt::Display for Labels<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Labels(pairs, le) = self;
        if pairs.is_empty() && le.is_none() {
            return Ok(());
        }
        f.write_str("{")?;
        let mut first = true;
        let le_pair = le.map(|v| ("le", v));
        for (k, v) in pairs.iter().map(|(k, v)| (*k, v.as_str())).chain(le_pair) {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{k}=\"")?;
            for c in v.chars() {
                match c {
                    '\\' => f.write_str("\\\\")?,
                    '"' => f.write_str("\\\"")?,
                    '\n' => f.write_str("\\n")?,
                    c => write!(f, "{c}")?,
                }
            }
            f.write_str("\"")?;
        }
        f.write_str("}")
    }
}

struct Num(f64);

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        if v.is_nan() {
            f.write_str("NaN")
        } else if v.is_infinite() {
            f.write_str(if v > 0.0 { "+Inf" } else { "-Inf" })
        } else {
            write!(f, "{v}")
        }
    }
}
