use std::fmt::Write as _;
use std::path::Path;

use ndarray::Array1;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand_isaac::Isaac64Rng;
use tempdir::TempDir;

use speciation::config::Config;
use speciation::gaussian::GaussianPeak;
use speciation::io::{read_dataset, write_series};
use speciation::pipeline::train;
use speciation::reference::ReferenceModel;
use speciation::spectrum::SpectralDataset;
use speciation::{Error, Result};

const INITIAL_BROMINE: f64 = 0.00342;
/// Tribromide amplitude per mol/L in the generated data
const SLOPE: f64 = 480.0;

fn bromine() -> ReferenceModel {
    ReferenceModel::new(vec![
        GaussianPeak::new(2.8, 285.0, 28.0).unwrap(),
        GaussianPeak::new(0.65, 395.0, 22.0).unwrap(),
        GaussianPeak::new(0.18, 455.0, 21.0).unwrap(),
    ])
    .unwrap()
}

fn tribromide() -> ReferenceModel {
    ReferenceModel::new(vec![
        GaussianPeak::new(1.1, 405.0, 19.0).unwrap(),
        GaussianPeak::new(2.4, 338.0, 21.0).unwrap(),
    ])
    .unwrap()
}

fn wavelengths() -> Vec<f64> {
    (250..=750).map(f64::from).collect()
}

/// A spectrum of `bromine_amplitude` times the bromine shape and `tribromide_amplitude` times the
/// tribromide shape, plus `offset`
fn spectrum(bromine_amplitude: f64, tribromide_amplitude: f64, offset: f64) -> Vec<f64> {
    let (bromine, tribromide) = (bromine(), tribromide());
    wavelengths()
        .iter()
        .map(|&wl| {
            bromine_amplitude * bromine.evaluate(wl)
                + tribromide_amplitude * tribromide.evaluate(wl)
                + offset
        })
        .collect()
}

/// Spectra of a run in which bromine falls to each of `bromine_amplitudes` in turn, the consumed
/// bromine becoming tribromide
fn depletion_run(bromine_amplitudes: &[f64]) -> Vec<Vec<f64>> {
    bromine_amplitudes
        .iter()
        .map(|&a| spectrum(a, SLOPE * INITIAL_BROMINE * (1.0 - a), 0.0))
        .collect()
}

fn write_export(path: &Path, times: &[f64], spectra: &[Vec<f64>]) -> Result<()> {
    let mut text = String::from("Exported data\nSample\nMethod\nCell 1\n\n");
    text.push_str("Time (s)");
    for wl in wavelengths() {
        write!(text, "\t{wl}").unwrap();
    }
    text.push('\n');
    for (time, spectrum) in times.iter().zip(spectra) {
        write!(text, "{time}").unwrap();
        for value in spectrum {
            write!(text, "\t{value}").unwrap();
        }
        text.push('\n');
    }
    std::fs::write(path, text)?;
    Ok(())
}

fn times(count: usize) -> Vec<f64> {
    (0..count).map(|ii| 300.0 * ii as f64).collect()
}

#[test]
fn concentrations_are_recovered_from_instrument_exports() -> Result<()> {
    // Arrange
    let tmp_dir = TempDir::new("concentrations_are_recovered_from_instrument_exports")?;
    let dir = tmp_dir.path();

    let reference_spectra = vec![spectrum(1.0, 0.0, 0.01), spectrum(0.3, 1.0, 0.0)];
    write_export(&dir.join("TRAIN1.TXT"), &times(2), &reference_spectra)?;

    let calibration_amplitudes = [1.0, 0.85, 0.7, 0.55, 0.4];
    write_export(
        &dir.join("TRAIN2.TXT"),
        &times(calibration_amplitudes.len()),
        &depletion_run(&calibration_amplitudes),
    )?;

    let run_amplitudes = [0.95, 0.8, 0.62, 0.5, 0.33];
    write_export(
        &dir.join("run1_17C.TXT"),
        &times(run_amplitudes.len()),
        &depletion_run(&run_amplitudes),
    )?;

    std::fs::write(
        dir.join("speciation.toml"),
        r#"
initial_bromine_concentration = 0.00342

[scaling]
warm_start = "previous-solution"

[data]
reference = "TRAIN1.TXT"
calibration = "TRAIN2.TXT"
runs = [{ input = "run1_17C.TXT", output = "17C_concs.txt" }]
"#,
    )?;

    // Act
    let config = Config::from_file(&dir.join("speciation.toml"))?;
    let reference = read_dataset(&config.data.reference, config.data.skip_rows)?;
    let calibration = read_dataset(&config.data.calibration, config.data.skip_rows)?;
    let model = train(&reference, &calibration, &config)?;

    let run = &config.data.runs[0];
    let dataset = read_dataset(&run.input, config.data.skip_rows)?;
    let prediction = model.predict(&dataset, &config);
    write_series(&run.output, &prediction.series)?;

    // Assert
    approx::assert_relative_eq!(model.calibration.line.slope, SLOPE, max_relative = 1e-4);
    approx::assert_relative_eq!(model.calibration.line.intercept, 0.0, epsilon = 1e-5);

    assert!(prediction.failures.is_empty());
    let written = std::fs::read_to_string(dir.join("17C_concs.txt"))?;
    let lines = written.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), run_amplitudes.len());

    for (ii, (line, a)) in lines.iter().zip(run_amplitudes).enumerate() {
        let fields = line
            .split(' ')
            .map(|field| field.parse::<f64>().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(fields.len(), 3);
        approx::assert_relative_eq!(fields[0], 5.0 * ii as f64);
        approx::assert_relative_eq!(fields[1], INITIAL_BROMINE * a, epsilon = 1e-7);
        approx::assert_relative_eq!(fields[2], INITIAL_BROMINE * (1.0 - a), epsilon = 1e-7);
    }

    Ok(())
}

#[test]
fn noisy_spectra_give_concentrations_close_to_the_truth() -> Result<()> {
    let seed = 40;
    let mut rng = Isaac64Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1e-4).unwrap();
    let axis = wavelengths();

    let mut noisy = |spectra: Vec<Vec<f64>>, name: &str| -> Result<SpectralDataset> {
        let columns = spectra
            .into_iter()
            .map(|s| {
                (Array1::from(s) + Array1::random_using(axis.len(), noise, &mut rng)).to_vec()
            })
            .collect::<Vec<_>>();
        SpectralDataset::from_columns(name, axis.clone(), times(columns.len()), &columns)
    };

    let reference = noisy(vec![spectrum(1.0, 0.0, 0.01), spectrum(0.3, 1.0, 0.0)], "reference")?;
    let calibration = noisy(depletion_run(&[1.0, 0.8, 0.6, 0.4, 0.2]), "calibration")?;
    let run_amplitudes = [0.9, 0.7, 0.5, 0.3];
    let run = noisy(depletion_run(&run_amplitudes), "run")?;

    let config = Config::default();
    let model = train(&reference, &calibration, &config)?;
    let prediction = model.predict(&run, &config);

    assert!(prediction.failures.is_empty());
    for (point, a) in prediction.series.iter().zip(run_amplitudes) {
        approx::assert_relative_eq!(point.bromine, INITIAL_BROMINE * a, epsilon = 5e-5);
        approx::assert_relative_eq!(point.tribromide, INITIAL_BROMINE * (1.0 - a), epsilon = 5e-5);
    }
    Ok(())
}

#[test]
fn calibration_run_without_bromine_depletion_is_degenerate() -> Result<()> {
    let reference = SpectralDataset::from_columns(
        "reference",
        wavelengths(),
        times(2),
        &[spectrum(1.0, 0.0, 0.01), spectrum(0.3, 1.0, 0.0)],
    )?;
    let calibration = SpectralDataset::from_columns(
        "calibration",
        wavelengths(),
        times(3),
        &depletion_run(&[0.7, 0.7, 0.7]),
    )?;

    let result = train(&reference, &calibration, &Config::default());

    assert!(matches!(result, Err(Error::DegenerateCalibration(_))));
    Ok(())
}

#[test]
fn calibration_run_that_cannot_be_fitted_names_the_failed_spectra() -> Result<()> {
    let reference = SpectralDataset::from_columns(
        "reference",
        wavelengths(),
        times(2),
        &[spectrum(1.0, 0.0, 0.01), spectrum(0.3, 1.0, 0.0)],
    )?;
    let mut columns = depletion_run(&[1.0, 0.7, 0.4]);
    for column in &mut columns {
        column[200] = f64::NAN;
    }
    let calibration =
        SpectralDataset::from_columns("calibration", wavelengths(), times(3), &columns)?;

    match train(&reference, &calibration, &Config::default()) {
        Err(Error::DegenerateCalibration(message)) => {
            assert!(message.contains("3 of 3 calibration spectra"));
            assert!(message.contains("0, 1, 2"));
        }
        other => panic!("expected a degenerate calibration, got {other:?}"),
    }
    Ok(())
}

#[test]
fn malformed_export_fails_before_fitting() -> Result<()> {
    let tmp_dir = TempDir::new("malformed_export_fails_before_fitting")?;
    let path = tmp_dir.path().join("TRAIN1.TXT");
    std::fs::write(
        &path,
        "a\nb\nc\nd\ne\nTime (s)\t400\t399\t401\n0\t0.1\t0.2\t0.3\n",
    )?;

    assert!(matches!(
        read_dataset(&path, 5),
        Err(Error::MalformedInput(_))
    ));
    Ok(())
}
