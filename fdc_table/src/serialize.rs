//! Rendering of calibration tables into a host-consumable text block.
//!
//! Every emitted line carries the `#*# ` sentinel so the artifact can sit
//! inside a larger host configuration file as an inert, clearly delimited
//! block until the host explicitly consumes it.

use std::fmt::Write as _;

use serde_json::Value as JsonValue;

use crate::offsets::OffsetMap;
use crate::quantize::decimals;
use crate::MeshTable;

/// Prefix applied to every artifact line.
pub const SENTINEL: &str = "#*# ";

/// Scalar summary reported alongside an offset table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Summary {
    pub temp_min: f64,
    pub temp_max: f64,
    pub step: f64,
    pub precision: u32,
    pub tram_enabled: bool,
}

/// Render a mesh table: one `[bed_mesh <temp>]` section per key with a
/// version tag, the grid as comma-joined fixed-point rows, and the mesh
/// metadata carried through from the source sample. Section temperatures
/// are formatted at `step`'s precision so the host can reconstruct the
/// section names from its own quantized temperatures.
pub fn serialize_mesh_table(table: &MeshTable, step: f64) -> String {
    let digits = decimals(step) as usize;
    let mut body = String::new();
    for (temp, section) in &table.sections {
        let _ = writeln!(body, "[bed_mesh {:.*}]", digits, temp.0);
        body.push_str("version = 1\n");
        body.push_str("points =\n");
        for row in section.points.rows() {
            let cells: Vec<String> = row.iter().map(|v| format!("{:.6}", v)).collect();
            let _ = writeln!(body, "\t{}", cells.join(", "));
        }
        for (key, value) in &section.params {
            let _ = writeln!(body, "{} = {}", key, param_text(value));
        }
        body.push('\n');
    }

    let mut out = String::with_capacity(body.len() + body.lines().count() * SENTINEL.len());
    for line in body.lines() {
        out.push_str(SENTINEL);
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Render an offset table as a single ordered `{temp: value, …}` mapping,
/// temperatures formatted at the step's precision.
pub fn render_offset_mapping(table: &OffsetMap, step: f64) -> String {
    let digits = decimals(step) as usize;
    let entries: Vec<String> = table
        .iter()
        .map(|(t, v)| format!("{:.*}: {}", digits, t.0, v))
        .collect();
    format!("{{{}}}", entries.join(", "))
}

/// Derive the scalar summary of an offset table, `None` when empty.
pub fn summarize(table: &OffsetMap, step: f64, tram_enabled: bool) -> Option<Summary> {
    let first = table.keys().next()?;
    let last = table.keys().next_back()?;
    Some(Summary {
        temp_min: first.0,
        temp_max: last.0,
        step,
        precision: decimals(step),
        tram_enabled,
    })
}

// Mesh metadata is written configparser-style: strings bare, everything
// else in its JSON form.
fn param_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MeshSection, MeshTable};
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, Array2};
    use ordered_float::OrderedFloat;
    use std::collections::BTreeMap;

    fn sample_table() -> MeshTable {
        let mut params = BTreeMap::new();
        params.insert("algo".to_string(), JsonValue::from("bicubic"));
        params.insert("x_count".to_string(), JsonValue::from(3));
        let mut sections = BTreeMap::new();
        sections.insert(
            OrderedFloat(24.7),
            MeshSection {
                points: arr2(&[
                    [0.0125, -0.003, 0.01],
                    [0.0, 0.0, 0.005],
                    [-0.02, 0.011, 0.0425],
                ]),
                params: params.clone(),
            },
        );
        sections.insert(
            OrderedFloat(24.8),
            MeshSection {
                points: arr2(&[
                    [0.013, -0.0031, 0.0101],
                    [0.0001, 0.0, 0.0052],
                    [-0.0205, 0.0115, 0.043],
                ]),
                params,
            },
        );
        MeshTable { sections }
    }

    /// Conforming reader used to verify the round trip: strips the sentinel
    /// and re-parses sections, points, and metadata.
    fn parse_mesh_table(text: &str) -> Vec<(f64, Array2<f64>, BTreeMap<String, String>)> {
        let mut out: Vec<(f64, Vec<Vec<f64>>, BTreeMap<String, String>)> = Vec::new();
        let mut in_points = false;
        for line in text.lines() {
            let line = line.strip_prefix(SENTINEL).unwrap_or(line);
            if let Some(rest) = line.strip_prefix("[bed_mesh ") {
                let temp: f64 = rest.trim_end_matches(']').parse().unwrap();
                out.push((temp, Vec::new(), BTreeMap::new()));
                in_points = false;
                continue;
            }
            if line.starts_with('\t') {
                assert!(in_points, "indented row outside a points block");
                let row: Vec<f64> = line
                    .trim()
                    .split(',')
                    .map(|c| c.trim().parse().unwrap())
                    .collect();
                out.last_mut().unwrap().1.push(row);
                continue;
            }
            in_points = false;
            if let Some((key, value)) = line.split_once(" = ") {
                if key == "points" {
                    in_points = true;
                } else if key != "version" {
                    out.last_mut()
                        .unwrap()
                        .2
                        .insert(key.to_string(), value.to_string());
                }
            } else if line.trim_end() == "points =" {
                in_points = true;
            }
        }
        out.into_iter()
            .map(|(temp, rows, params)| {
                let cols = rows[0].len();
                let flat: Vec<f64> = rows.iter().flatten().copied().collect();
                (
                    temp,
                    Array2::from_shape_vec((rows.len(), cols), flat).unwrap(),
                    params,
                )
            })
            .collect()
    }

    #[test]
    fn every_line_carries_the_sentinel() {
        let text = serialize_mesh_table(&sample_table(), 0.1);
        assert!(text.lines().all(|l| l.starts_with("#*#")));
    }

    #[test]
    fn section_headers_render_at_step_precision() {
        let mut sections = BTreeMap::new();
        for temp in [20.0, 21.0] {
            sections.insert(
                OrderedFloat(temp),
                MeshSection {
                    points: Array2::zeros((3, 3)),
                    params: BTreeMap::new(),
                },
            );
        }
        let table = MeshTable { sections };

        // An integral temperature at a fractional step still carries the
        // fractional digits the host expects.
        let text = serialize_mesh_table(&table, 0.1);
        assert!(text.contains("#*# [bed_mesh 20.0]"));
        assert!(text.contains("#*# [bed_mesh 21.0]"));
        let parsed = parse_mesh_table(&text);
        assert_eq!(parsed[0].0, 20.0);

        let text = serialize_mesh_table(&table, 0.25);
        assert!(text.contains("#*# [bed_mesh 20.00]"));

        let text = serialize_mesh_table(&table, 1.0);
        assert!(text.contains("#*# [bed_mesh 20]"));
    }

    #[test]
    fn mesh_round_trip_preserves_temps_and_values() {
        let table = sample_table();
        let parsed = parse_mesh_table(&serialize_mesh_table(&table, 0.1));
        assert_eq!(parsed.len(), table.sections.len());
        for ((temp, points, params), (key, section)) in parsed.iter().zip(table.sections.iter()) {
            assert_eq!(*temp, key.0);
            assert_eq!(points.dim(), section.points.dim());
            for (a, b) in points.iter().zip(section.points.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-6);
            }
            assert_eq!(params["algo"], "bicubic");
            assert_eq!(params["x_count"], "3");
        }
    }

    #[test]
    fn offset_mapping_orders_keys_at_step_precision() {
        let mut table = OffsetMap::new();
        table.insert(OrderedFloat(25.0), 0.025);
        table.insert(OrderedFloat(20.0), 0.0);
        let text = render_offset_mapping(&table, 0.1);
        assert_eq!(text, "{20.0: 0, 25.0: 0.025}");
    }

    #[test]
    fn summary_reports_bounds_and_precision() {
        let mut table = OffsetMap::new();
        table.insert(OrderedFloat(20.0), 0.0);
        table.insert(OrderedFloat(30.0), 0.075);
        let summary = summarize(&table, 0.1, false).unwrap();
        assert_eq!(summary.temp_min, 20.0);
        assert_eq!(summary.temp_max, 30.0);
        assert_eq!(summary.precision, 1);
        assert!(!summary.tram_enabled);
        assert!(summarize(&OffsetMap::new(), 0.1, false).is_none());
    }
}
