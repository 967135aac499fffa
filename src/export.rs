//! Writing retrieved traces to CSV or JSON.

use crate::error::Result;
use crate::trace::TraceData;
use std::io;
use std::path::Path;

/// Write `traces` as CSV, one row per point.
///
/// Columns are `trace,index[,frequency_hz],<first>,<second>`; the value column
/// names follow the trace format when all traces share one.
pub fn write_csv<W: io::Write>(writer: W, traces: &[TraceData]) -> Result<()> {
    let (first, second) = match traces.first() {
        Some(head) if traces.iter().all(|t| t.format == head.format) => head.format.column_names(),
        _ => ("first", "second"),
    };
    let with_frequencies = traces.iter().any(|t| t.frequencies.is_some());

    let mut csv = csv::Writer::from_writer(writer);

    let mut header = vec!["trace", "index"];
    if with_frequencies {
        header.push("frequency_hz");
    }
    header.extend([first, second]);
    csv.write_record(&header)?;

    for trace in traces {
        for (i, (a, b)) in trace.points().enumerate() {
            let mut record = vec![trace.name.clone(), i.to_string()];
            if with_frequencies {
                let frequency = trace
                    .frequencies
                    .as_ref()
                    .and_then(|f| f.get(i))
                    .map(|f| f.to_string())
                    .unwrap_or_default();
                record.push(frequency);
            }
            record.push(a.to_string());
            record.push(b.to_string());
            csv.write_record(&record)?;
        }
    }

    csv.flush()?;
    Ok(())
}

/// Write `traces` as CSV to the file at `path`.
pub fn write_csv_file<P: AsRef<Path>>(path: P, traces: &[TraceData]) -> Result<()> {
    let file = std::fs::File::create(path.as_ref())?;
    write_csv(io::BufWriter::new(file), traces)?;
    tracing::info!(path = %path.as_ref().display(), traces = traces.len(), "traces written");
    Ok(())
}

/// Serialize `traces` as a pretty-printed JSON array.
pub fn to_json(traces: &[TraceData]) -> Result<String> {
    Ok(serde_json::to_string_pretty(traces)?)
}
