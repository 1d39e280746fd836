use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueHint};
use fdc_table::{
    build_mesh_table, build_offset_tables, render_offset_mapping, serialize_mesh_table, summarize,
    Dataset, OffsetMap, Strategy, TableParams, ZOffsetTables,
};
use plotters::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Frame-deflection calibration table generator",
    long_about = None,
    after_help = "variable_z_height_temps is derived from the first z stepper in name order; \
                  every stepper's curve is drawn in the offset plots."
)]
struct Cli {
    /// thermal_quant_*.json capture from the measurement run
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output config path (defaults next to the input with a _NEW.cfg suffix)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Temperature grid resolution in degC
    #[arg(long, default_value_t = 0.1)]
    step: f64,

    /// Outer extrapolation margin in degC (linear strategy only)
    #[arg(long, default_value_t = 3.0)]
    extra_temp: f64,

    /// Fit one global cubic spline per channel instead of per-pair segments
    #[arg(long, action = ArgAction::SetTrue)]
    spline: bool,

    /// Denoise spline resamples with the full-window polynomial filter
    #[arg(long, action = ArgAction::SetTrue)]
    smooth: bool,

    /// Polynomial order of the smoothing filter
    #[arg(long, default_value_t = 5)]
    smooth_order: usize,

    /// Directory for offset plots (defaults to the input's directory)
    #[arg(long, value_hint = ValueHint::DirPath)]
    plot_dir: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    let params = TableParams {
        step: cli.step,
        extra_temp: cli.extra_temp,
        strategy: if cli.spline {
            Strategy::Spline
        } else {
            Strategy::Linear
        },
        smoothing: cli.smooth,
        smoothing_order: cli.smooth_order,
        ..TableParams::default()
    };

    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;
    let dataset = Dataset::from_json(&text)?;
    info!(
        samples = dataset.samples.len(),
        unit_distance = dataset.unit_distance,
        "dataset loaded"
    );

    let mesh_table = build_mesh_table(&dataset, &params)?;
    let artifact = serialize_mesh_table(&mesh_table, params.step);
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output(&cli.input));
    // The table is fully assembled in memory before the single write.
    fs::write(&output, artifact).with_context(|| format!("writing {}", output.display()))?;
    info!(
        path = %output.display(),
        sections = mesh_table.sections.len(),
        "wrote mesh table"
    );

    let tables = build_offset_tables(&dataset, &params)?;
    print_summary(&tables, &params);

    if !cli.no_plot {
        let dir = cli.plot_dir.clone().unwrap_or_else(|| {
            cli.input
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        });
        render_offset_chart(&tables.z_offsets, "z offsets", &dir.join("z_offsets.png"))?;
        if tables.tram_enabled() {
            render_offset_chart(
                &tables.tram_offsets,
                "z tram offsets",
                &dir.join("z_tram_offsets.png"),
            )?;
        }
    }

    println!();
    println!("Copy the variables above into the host macro and merge the new bed meshes.");
    Ok(())
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("thermal_quant");
    input.with_file_name(format!("{stem}_NEW.cfg"))
}

/// The z steppers share one leadscrew-coupled axis, so their height curves
/// agree up to noise and the host macro takes a single table. The first
/// stepper in name order is the reference.
fn z_height_source(tables: &ZOffsetTables) -> Option<(&String, &OffsetMap)> {
    tables.z_offsets.iter().next()
}

/// Print the host-macro variable block the way the consuming macro expects
/// it, one `variable_*` line per setting.
fn print_summary(tables: &ZOffsetTables, params: &TableParams) {
    let Some((stepper, heights)) = z_height_source(tables) else {
        return;
    };
    info!(stepper = %stepper, "z height table taken from the first stepper in name order");
    println!(
        "variable_z_height_temps: {}",
        render_offset_mapping(heights, params.step)
    );
    println!();

    let last_trams: Vec<String> = tables
        .tram_offsets
        .keys()
        .map(|s| format!("'{s}': 0"))
        .collect();
    println!("variable_last_trams: {{{}}}", last_trams.join(", "));
    let tram_maps: Vec<String> = tables
        .tram_offsets
        .iter()
        .map(|(s, t)| format!("'{s}': {}", render_offset_mapping(t, params.step)))
        .collect();
    println!("variable_z_trams_temps: {{{}}}", tram_maps.join(", "));
    println!(
        "variable_enable_tram: {}",
        if tables.tram_enabled() { 1 } else { 0 }
    );
    println!();

    if let Some(summary) = summarize(heights, params.step, tables.tram_enabled()) {
        println!("variable_temp_min: {}", summary.temp_min);
        println!("variable_temp_max: {}", summary.temp_max);
        println!("variable_step: {}", summary.step);
        println!("variable_precision: {}", summary.precision);
    }
}

fn render_offset_chart(
    tables: &BTreeMap<String, OffsetMap>,
    title: &str,
    path: &Path,
) -> Result<()> {
    if tables.is_empty() || tables.values().all(|t| t.is_empty()) {
        return Ok(());
    }

    let mut x_min = f64::MAX;
    let mut x_max = f64::MIN;
    let mut y_min = f64::MAX;
    let mut y_max = f64::MIN;
    for table in tables.values() {
        for (t, v) in table {
            x_min = x_min.min(t.0);
            x_max = x_max.max(t.0);
            y_min = y_min.min(*v);
            y_max = y_max.max(*v);
        }
    }
    if x_max - x_min < 1e-9 {
        x_max = x_min + 1.0;
    }
    if y_max - y_min < 1e-9 {
        y_max = y_min + 1e-3;
    }

    let root = BitMapBackend::new(path, (1280, 760)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(25)
        .caption(title, ("sans-serif", 24))
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart
        .configure_mesh()
        .x_desc("Temperatures [C]")
        .y_desc("Z height [mm]")
        .draw()?;

    let palette = [
        RGBColor(200, 0, 100),
        RGBColor(30, 144, 255),
        RGBColor(34, 139, 34),
        RGBColor(90, 90, 90),
    ];
    for (idx, (stepper, table)) in tables.iter().enumerate() {
        let color = palette[idx % palette.len()];
        chart
            .draw_series(LineSeries::new(
                table.iter().map(|(t, v)| (t.0, *v)),
                &color,
            ))?
            .label(stepper.clone())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;
    root.present()?;
    info!(path = %path.display(), "wrote offset plot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn z_height_source_is_the_first_stepper_in_name_order() {
        let mut tables = ZOffsetTables::default();
        tables.z_offsets.insert("stepper_z1".to_string(), OffsetMap::new());
        tables.z_offsets.insert("stepper_z".to_string(), OffsetMap::new());
        let (stepper, _) = z_height_source(&tables).unwrap();
        assert_eq!(stepper.as_str(), "stepper_z");
        assert!(z_height_source(&ZOffsetTables::default()).is_none());
    }

    #[test]
    fn default_output_sits_next_to_the_input() {
        let out = default_output(Path::new("/data/thermal_quant_2024.json"));
        assert_eq!(out, PathBuf::from("/data/thermal_quant_2024_NEW.cfg"));
    }
}
