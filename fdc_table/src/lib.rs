//! Core calibration-table synthesis library.
//!
//! Turns the sparse, noisy samples of a thermal quantification run (frame
//! temperature, bed height map, raw axis positions per timestamp) into
//! dense, temperature-indexed calibration tables ready to merge into a host
//! controller configuration.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use ndarray::Array2;
use ordered_float::OrderedFloat;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

pub mod interp;
pub mod mesh;
pub mod offsets;
pub mod quantize;
pub mod reduce;
pub mod serialize;

pub use interp::{interpolate, InterpConfig, Strategy};
pub use mesh::MeshSample;
pub use offsets::OffsetMap;
pub use serialize::{
    render_offset_mapping, serialize_mesh_table, summarize, Summary, SENTINEL,
};

#[derive(Error, Debug)]
pub enum FdcError {
    #[error("failed to parse dataset: {0}")]
    DatasetParse(String),
    #[error("insufficient data for calibration: {0}")]
    InsufficientData(String),
    #[error("mesh grid needs odd dimensions for a center cell, got {rows}x{cols}")]
    MeshShape { rows: usize, cols: usize },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// One captured datapoint of the heating run, immutable once parsed.
#[derive(Clone, Debug)]
pub struct Sample {
    pub stamp: DateTime<Utc>,
    pub frame_temp: f64,
    pub mesh: Option<MeshSample>,
    /// Raw MCU step count per z stepper.
    pub z_pos: BTreeMap<String, i64>,
    /// Step counts captured before the leveling pass, when tramming ran.
    pub z_pos_before_tram: Option<BTreeMap<String, i64>>,
    /// Remaining numeric readings (bed, hotend, chamber, extra sensors).
    pub sensors: BTreeMap<String, f64>,
}

/// A complete thermal quantification dataset, samples in timestamp order.
#[derive(Clone, Debug)]
pub struct Dataset {
    /// Physical length of one MCU step on the z axis.
    pub unit_distance: f64,
    pub samples: Vec<Sample>,
}

#[derive(Deserialize)]
struct RawDataset {
    metadata: RawMetadata,
    hot_mesh: BTreeMap<String, RawSample>,
}

#[derive(Deserialize)]
struct RawMetadata {
    z_axis: RawZAxis,
}

#[derive(Deserialize)]
struct RawZAxis {
    step_dist: f64,
}

#[derive(Deserialize)]
struct RawSample {
    frame_temp: f64,
    #[serde(default)]
    mesh: Option<RawMesh>,
    #[serde(default)]
    z_pos: BTreeMap<String, i64>,
    #[serde(default)]
    z_pos_before_tram: Option<BTreeMap<String, i64>>,
    #[serde(flatten)]
    extra: BTreeMap<String, JsonValue>,
}

#[derive(Deserialize)]
struct RawMesh {
    points: Vec<Vec<f64>>,
    #[serde(default)]
    mesh_params: BTreeMap<String, JsonValue>,
}

impl Dataset {
    /// Parse the acquisition tool's `thermal_quant_*.json` layout.
    pub fn from_json(text: &str) -> Result<Self, FdcError> {
        let raw: RawDataset =
            serde_json::from_str(text).map_err(|e| FdcError::DatasetParse(e.to_string()))?;
        let mut samples = Vec::with_capacity(raw.hot_mesh.len());
        for (stamp_text, sample) in raw.hot_mesh {
            let stamp = NaiveDateTime::parse_from_str(&stamp_text, "%Y/%m/%d-%H:%M:%S")
                .map_err(|e| {
                    FdcError::DatasetParse(format!("bad sample stamp {stamp_text:?}: {e}"))
                })?
                .and_utc();
            let mesh = sample.mesh.map(mesh_from_raw).transpose()?;
            let sensors = sample
                .extra
                .into_iter()
                .filter_map(|(k, v)| v.as_f64().map(|f| (k, f)))
                .collect();
            samples.push(Sample {
                stamp,
                frame_temp: sample.frame_temp,
                mesh,
                z_pos: sample.z_pos,
                z_pos_before_tram: sample.z_pos_before_tram,
                sensors,
            });
        }
        samples.sort_by_key(|s| s.stamp);
        Ok(Self {
            unit_distance: raw.metadata.z_axis.step_dist,
            samples,
        })
    }
}

fn mesh_from_raw(raw: RawMesh) -> Result<MeshSample, FdcError> {
    let rows = raw.points.len();
    let cols = raw.points.first().map(|r| r.len()).unwrap_or(0);
    if raw.points.iter().any(|r| r.len() != cols) {
        return Err(FdcError::DatasetParse("ragged mesh point rows".into()));
    }
    let flat: Vec<f64> = raw.points.into_iter().flatten().collect();
    let points = Array2::from_shape_vec((rows, cols), flat)
        .map_err(|e| FdcError::DatasetParse(e.to_string()))?;
    Ok(MeshSample {
        points,
        params: raw.mesh_params,
    })
}

/// Table synthesis configuration, threaded explicitly through each stage.
#[derive(Clone, Debug)]
pub struct TableParams {
    /// Temperature grid resolution in degC; also fixes key precision.
    pub step: f64,
    /// Outer extrapolation margin in degC (linear strategy).
    pub extra_temp: f64,
    pub strategy: Strategy,
    /// Denoise spline resamples with the full-window polynomial filter.
    pub smoothing: bool,
    pub smoothing_order: usize,
    /// Mesh-center magnitude above which a drift diagnostic is emitted.
    pub center_drift_tol: f64,
}

impl Default for TableParams {
    fn default() -> Self {
        Self {
            step: 0.1,
            extra_temp: 3.0,
            strategy: Strategy::Linear,
            smoothing: false,
            smoothing_order: 5,
            center_drift_tol: 0.002,
        }
    }
}

impl TableParams {
    fn interp(&self) -> InterpConfig {
        InterpConfig {
            step: self.step,
            extra_temp: self.extra_temp,
            smoothing: self.smoothing,
            smoothing_order: self.smoothing_order,
        }
    }
}

/// One rendered mesh section: normalized grid plus the metadata carried
/// through unchanged from its source sample.
#[derive(Clone, Debug)]
pub struct MeshSection {
    pub points: Array2<f64>,
    pub params: BTreeMap<String, JsonValue>,
}

/// Temperature-keyed bed mesh calibration table.
#[derive(Clone, Debug, Default)]
pub struct MeshTable {
    pub sections: BTreeMap<OrderedFloat<f64>, MeshSection>,
}

/// Per-stepper offset tables in physical length units.
#[derive(Clone, Debug, Default)]
pub struct ZOffsetTables {
    pub z_offsets: BTreeMap<String, OffsetMap>,
    /// Empty when fewer than two samples carried a pre-tram snapshot.
    pub tram_offsets: BTreeMap<String, OffsetMap>,
}

impl ZOffsetTables {
    pub fn tram_enabled(&self) -> bool {
        !self.tram_offsets.is_empty()
    }
}

/// Build the dense bed-mesh table: reduce mesh-carrying samples, rebase
/// each retained map to its center cell, then interpolate every cell as an
/// independent scalar channel.
pub fn build_mesh_table(dataset: &Dataset, params: &TableParams) -> Result<MeshTable, FdcError> {
    let reduced = reduce::reduce(
        dataset
            .samples
            .iter()
            .filter_map(|s| s.mesh.as_ref().map(|m| (s.frame_temp, m))),
        params.step,
    );
    if reduced.len() < 2 {
        return Err(FdcError::InsufficientData(format!(
            "{} mesh samples after reduction, need at least 2",
            reduced.len()
        )));
    }
    let anchors = reduced.into_entries();
    let dim = anchors[0].1.points.dim();
    let mut temps = Vec::with_capacity(anchors.len());
    let mut flat = Vec::with_capacity(anchors.len() * dim.0 * dim.1);
    for (temp, sample) in &anchors {
        if sample.points.dim() != dim {
            return Err(FdcError::DatasetParse(format!(
                "mesh at {} degC has shape {:?}, expected {:?}",
                temp,
                sample.points.dim(),
                dim
            )));
        }
        let normalized = mesh::normalize(&sample.points, params.center_drift_tol)?;
        flat.extend(normalized.iter().copied());
        temps.push(*temp);
    }
    let values = Array2::from_shape_vec((anchors.len(), dim.0 * dim.1), flat)
        .map_err(|e| FdcError::InvalidParameter(e.to_string()))?;

    let dense = interp::interpolate(params.strategy, &temps, &values, &params.interp())?;

    let mut sections = BTreeMap::new();
    for (temp, row) in dense.into_entries() {
        let points = Array2::from_shape_vec(dim, row.to_vec())
            .map_err(|e| FdcError::InvalidParameter(e.to_string()))?;
        // metadata travels from the nearest source sample at or below this key
        let idx = temps.partition_point(|&t| t <= temp).saturating_sub(1);
        sections.insert(
            OrderedFloat(temp),
            MeshSection {
                points,
                params: anchors[idx].1.params.clone(),
            },
        );
    }
    Ok(MeshTable { sections })
}

/// Build per-stepper cumulative z-offset tables from raw step counts, plus
/// tram-offset tables from whichever samples carry a pre-tram snapshot (at
/// least two are needed to interpolate).
pub fn build_offset_tables(
    dataset: &Dataset,
    params: &TableParams,
) -> Result<ZOffsetTables, FdcError> {
    let reduced = reduce::reduce(
        dataset.samples.iter().map(|s| (s.frame_temp, s)),
        params.step,
    );
    if reduced.len() < 2 {
        return Err(FdcError::InsufficientData(format!(
            "{} samples after reduction, need at least 2",
            reduced.len()
        )));
    }
    let anchors = reduced.into_entries();
    let steppers: Vec<String> = anchors[0].1.z_pos.keys().cloned().collect();
    if steppers.is_empty() {
        return Err(FdcError::DatasetParse(
            "samples carry no z position data".into(),
        ));
    }
    let temps: Vec<f64> = anchors.iter().map(|(t, _)| *t).collect();

    let mut values = Array2::zeros((anchors.len(), steppers.len()));
    for (row, (_, sample)) in anchors.iter().enumerate() {
        for (col, name) in steppers.iter().enumerate() {
            let z = *sample.z_pos.get(name).ok_or_else(|| {
                FdcError::DatasetParse(format!("sample missing z position for {name}"))
            })?;
            values[(row, col)] = z as f64;
        }
    }

    let dense = interp::interpolate(params.strategy, &temps, &values, &params.interp())?;
    let dense_entries = dense.into_entries();

    let mut tables = ZOffsetTables::default();
    for (col, name) in steppers.iter().enumerate() {
        let table = offsets::accumulate(
            dense_entries.iter().map(|(t, row)| (*t, row[col])),
            dataset.unit_distance,
        );
        let raw: Vec<f64> = dataset
            .samples
            .iter()
            .filter_map(|s| s.z_pos.get(name).map(|&v| v as f64))
            .collect();
        offsets::drift_check(&raw, &table, dataset.unit_distance, name);
        tables.z_offsets.insert(name.clone(), table);
    }

    // Tram channels come from the subsequence of anchors that carry a
    // pre-tram snapshot: a run may start before the first leveling pass,
    // and those early samples simply do not contribute.
    let tram_anchors: Vec<(f64, &Sample)> = anchors
        .iter()
        .filter(|(_, s)| s.z_pos_before_tram.is_some())
        .map(|(t, s)| (*t, *s))
        .collect();
    if tram_anchors.len() == 1 {
        warn!("only one sample carries a pre-tram snapshot, tram offsets disabled");
    } else if tram_anchors.len() >= 2 {
        let tram_temps: Vec<f64> = tram_anchors.iter().map(|(t, _)| *t).collect();
        let mut tram_values = Array2::zeros((tram_anchors.len(), steppers.len()));
        for (row, (_, sample)) in tram_anchors.iter().enumerate() {
            for (col, name) in steppers.iter().enumerate() {
                let z = *sample.z_pos.get(name).ok_or_else(|| {
                    FdcError::DatasetParse(format!("sample missing z position for {name}"))
                })?;
                let before = sample
                    .z_pos_before_tram
                    .as_ref()
                    .and_then(|m| m.get(name))
                    .copied()
                    .ok_or_else(|| {
                        FdcError::DatasetParse(format!(
                            "sample missing pre-tram position for {name}"
                        ))
                    })?;
                tram_values[(row, col)] = (z - before) as f64;
            }
        }
        let dense = interp::interpolate(
            params.strategy,
            &tram_temps,
            &tram_values,
            &params.interp(),
        )?;
        let dense_entries = dense.into_entries();
        for (col, name) in steppers.iter().enumerate() {
            let table = offsets::accumulate(
                dense_entries.iter().map(|(t, row)| (*t, row[col])),
                dataset.unit_distance,
            );
            tables.tram_offsets.insert(name.clone(), table);
        }
    }
    Ok(tables)
}
