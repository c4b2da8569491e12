use std::fs;
use std::io::Write;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Terminator, Trim, WriterBuilder};

use crate::predictor::ConcentrationPoint;
use crate::spectrum::SpectralDataset;
use crate::{Error, Result};

/// Read a spectrometer export into a dataset named after the file stem
///
/// The export has `skip_rows` preamble lines, then a tab-delimited table: a header row holding a
/// label followed by the wavelengths, and one row per spectrum holding the capture time followed
/// by the absorbance at each wavelength. Files may be UTF-8 or UTF-16 with a byte order mark.
///
/// # Errors
/// Returns [`Error::Io`] if the file cannot be read and [`Error::MalformedInput`] if the text is
/// not a valid table of spectra.
pub fn read_dataset(path: &Path, skip_rows: usize) -> Result<SpectralDataset> {
    let name = path
        .file_stem()
        .map_or_else(|| path.display().to_string(), |stem| stem.to_string_lossy().into_owned());
    let text = decode(&fs::read(path)?)?;
    parse_dataset(name, &text, skip_rows)
}

/// Parse the text of a spectrometer export, see [`read_dataset`]
///
/// # Errors
/// Returns [`Error::MalformedInput`] if the table is empty, holds non-numeric values, or its
/// rows do not line up with the wavelength header.
pub fn parse_dataset(
    name: impl Into<String>,
    text: &str,
    skip_rows: usize,
) -> Result<SpectralDataset> {
    let name = name.into();
    let table = text.lines().skip(skip_rows).collect::<Vec<_>>().join("\n");

    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(table.as_bytes());

    let header = rdr.headers()?.clone();
    let wavelengths = numeric_cells(&header, 1, skip_rows + 1)?;
    if wavelengths.is_empty() {
        return Err(Error::MalformedInput(format!(
            "`{name}` has no wavelengths in its header row"
        )));
    }

    let mut times = vec![];
    let mut columns = vec![];
    for (ii, record) in rdr.records().enumerate() {
        let record = record?;
        let line = skip_rows + ii + 2;
        let mut values = numeric_cells(&record, 0, line)?.into_iter();
        let Some(time) = values.next() else {
            continue;
        };
        let absorbance = values.collect::<Vec<_>>();
        if absorbance.len() != wavelengths.len() {
            return Err(Error::MalformedInput(format!(
                "`{name}` line {line} has {} absorbance readings for {} wavelengths",
                absorbance.len(),
                wavelengths.len()
            )));
        }
        times.push(time);
        columns.push(absorbance);
    }

    SpectralDataset::from_columns(name, wavelengths, times, &columns)
}

/// Parse the cells of a row after the first `skip`, ignoring empty trailing cells
fn numeric_cells(record: &StringRecord, skip: usize, line: usize) -> Result<Vec<f64>> {
    let cells = record
        .iter()
        .rev()
        .skip_while(|cell| cell.is_empty())
        .collect::<Vec<_>>();
    cells
        .into_iter()
        .rev()
        .skip(skip)
        .map(|cell| {
            cell.parse::<f64>().map_err(|_| {
                Error::MalformedInput(format!("line {line}: `{cell}` is not a number"))
            })
        })
        .collect()
}

/// Decode UTF-16 text marked by a byte order mark, or UTF-8 otherwise
fn decode(bytes: &[u8]) -> Result<String> {
    let utf16 = |rest: &[u8], from_bytes: fn([u8; 2]) -> u16| {
        if rest.len() % 2 != 0 {
            return Err(Error::MalformedInput(format!(
                "UTF-16 text has an odd number of bytes ({})",
                rest.len() + 2
            )));
        }
        let units = rest
            .chunks_exact(2)
            .map(|pair| from_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        String::from_utf16(&units)
            .map_err(|e| Error::MalformedInput(format!("invalid UTF-16 text: {e}")))
    };
    match bytes {
        [0xFF, 0xFE, rest @ ..] => utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => utf16(rest, u16::from_be_bytes),
        _ => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| Error::MalformedInput(format!("invalid UTF-8 text: {e}")))?;
            Ok(text.trim_start_matches('\u{feff}').to_owned())
        }
    }
}

/// Write `time [Br2] [NaBr3]` lines, space separated and without a header
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_series(path: &Path, series: &[ConcentrationPoint]) -> Result<()> {
    write_series_to(fs::File::create(path)?, series)
}

/// As [`write_series`], into any writer
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_series_to<W: Write>(writer: W, series: &[ConcentrationPoint]) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(writer);
    for point in series {
        wtr.write_record([
            point.time.to_string(),
            point.bromine.to_string(),
            point.tribromide.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
