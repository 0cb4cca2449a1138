//! ---
//! mtc_section: "01-core-functionality"
//! mtc_subsection: "binary"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Adapter daemon driving a simulated machine tool."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
use std::f64::consts::PI;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use rand::prelude::*;
use rand_distr::Normal;
use tracing::{debug, info};

use mtc_asset::{CountDirection, CuttingItem, CuttingTool, LifeType, Measurement, ToolLife};
use mtc_common::config::SimulatorConfig;
use mtc_datum::{Condition, CountEvent, Datum, Message, Sample, TextEvent, TimeSeries};
use mtc_net::Adapter;

/// Alarm table the simulator draws faults from.
const FAULTS: &[(&str, &str)] = &[
    ("1001", "Spindle overtemperature"),
    ("1002", "Axis following error"),
    ("2010", "Coolant level low"),
    ("3005", "Door interlock open"),
];

const SAMPLES_PER_SERIES: usize = 10;
const SERIES_RATE_HZ: f64 = 10.0;
const SPINDLE_MAX_RPM: f64 = 12_000.0;

/// A machine tool whose state is invented every tick.
pub struct SimulatedMachine {
    rng: StdRng,
    noise: Normal<f64>,
    fault_probability: f64,
    tick: u64,
    active: Vec<usize>,
    avail: Arc<Mutex<TextEvent>>,
    execution: Arc<Mutex<TextEvent>>,
    spindle_speed: Arc<Mutex<Sample>>,
    part_count: Arc<Mutex<CountEvent>>,
    message: Arc<Mutex<Message>>,
    temperature: Arc<Mutex<TimeSeries>>,
    system: Arc<Mutex<Condition>>,
}

fn named<D>(
    device: Option<&str>,
    name: &str,
    plain: impl FnOnce(String) -> D,
    scoped: impl FnOnce(String, String) -> D,
) -> D {
    match device {
        Some(device) => scoped(device.to_owned(), name.to_owned()),
        None => plain(name.to_owned()),
    }
}

impl SimulatedMachine {
    /// Register the simulated data items with `adapter`.
    pub fn install(adapter: &Adapter, config: &SimulatorConfig) -> Result<Self> {
        let device = config.device.as_deref();
        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let noise = Normal::new(0.0, 0.4).map_err(|err| anyhow!("invalid noise model: {err}"))?;

        let machine = Self {
            rng: StdRng::seed_from_u64(seed),
            noise,
            fault_probability: config.fault_probability,
            tick: 0,
            active: Vec::new(),
            avail: adapter.add_datum(named(
                device,
                "avail",
                |n| TextEvent::new(n),
                |d, n| TextEvent::with_device(d, n),
            )),
            execution: adapter.add_datum(named(
                device,
                "execution",
                |n| TextEvent::new(n),
                |d, n| TextEvent::with_device(d, n),
            )),
            spindle_speed: adapter.add_datum(named(
                device,
                "Sspeed",
                |n| Sample::new(n),
                |d, n| Sample::with_device(d, n),
            )),
            part_count: adapter.add_datum(named(
                device,
                "partCount",
                |n| CountEvent::new(n),
                |d, n| CountEvent::with_device(d, n),
            )),
            message: adapter.add_datum(named(
                device,
                "message",
                |n| Message::new(n),
                |d, n| Message::with_device(d, n),
            )),
            temperature: adapter.add_datum(
                named(
                    device,
                    "temperature",
                    |n| TimeSeries::new(n),
                    |d, n| TimeSeries::with_device(d, n),
                )
                .with_rate(SERIES_RATE_HZ),
            ),
            system: adapter.add_datum(match device {
                Some(device) => Condition::with_device(device, "system", false),
                None => Condition::new("system"),
            }),
        };
        info!(seed, datums = adapter.datum_keys().len(), "simulated machine installed");
        Ok(machine)
    }

    /// Advance the simulation by one publish interval.
    ///
    /// Must run between `Adapter::begin` and `Adapter::send_changed`: faults
    /// that are not re-asserted here are swept back to NORMAL.
    pub fn step(&mut self) {
        self.tick += 1;
        self.avail.lock().set("AVAILABLE");

        self.active.retain(|_| self.rng.gen_bool(0.7));
        if self.rng.gen_bool(self.fault_probability) {
            let index = self.rng.gen_range(0..FAULTS.len());
            if !self.active.contains(&index) {
                let (code, text) = FAULTS[index];
                debug!(code, "simulated fault raised");
                self.message.lock().set_coded(code, text);
                self.active.push(index);
            }
        }
        {
            let mut system = self.system.lock();
            if self.active.is_empty() {
                system.normal();
            }
            for &index in &self.active {
                let (code, text) = FAULTS[index];
                system.fault(code, text);
            }
        }

        let running = self.active.is_empty() && self.tick % 20 < 16;
        self.execution
            .lock()
            .set(if running { "ACTIVE" } else { "READY" });

        let phase = self.tick as f64 / 40.0 * 2.0 * PI;
        let speed = if running {
            (SPINDLE_MAX_RPM * (0.6 + 0.3 * phase.sin())).round()
        } else {
            0.0
        };
        self.spindle_speed.lock().set(speed);

        if running && self.tick % 8 == 0 {
            let mut parts = self.part_count.lock();
            let next = parts.value().copied().unwrap_or(0).saturating_add(1);
            parts.set(next);
        }

        let base = 38.0 + speed / SPINDLE_MAX_RPM * 12.0;
        let series = (0..SAMPLES_PER_SERIES)
            .map(|_| ((base + self.noise.sample(&mut self.rng)) * 100.0).round() / 100.0)
            .collect();
        self.temperature.lock().set(series);
    }

    /// Whether any simulated fault is currently asserted.
    pub fn is_faulted(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn is_available(&self) -> bool {
        self.avail.lock().is_available()
    }
}

/// Tool announced to agents at startup.
pub fn sample_tool() -> CuttingTool {
    let mut tool = CuttingTool::new("TOOL-1001", "T1", "SN-1001")
        .with_description("12mm four flute end mill")
        .with_manufacturers("Simulated Tooling");
    tool.add_status(["NEW", "AVAILABLE"]);
    tool.add_life(
        ToolLife::new(LifeType::Minutes, CountDirection::Up, "0")
            .with_bounds("0", "240")
            .with_warning("200"),
    );
    tool.add_property(
        "ProcessSpindleSpeed",
        [("minimum", "4000"), ("maximum", "12000")],
        "9000",
    );
    tool.add_measurement(
        Measurement::new("CuttingDiameterMax", "DC", 12.0)
            .with_range(12.0, 11.98, 12.02)
            .with_units("MILLIMETER"),
    );
    let mut flute = CuttingItem::new("1-4").with_description("Solid carbide flute");
    flute.add_measurement(
        Measurement::new("FunctionalLength", "LF", 30.0).with_units("MILLIMETER"),
    );
    tool.add_item(flute);
    tool
}
