use std::io;
use std::path::Path;

use crate::error::Result;
use crate::features::Feature;
use crate::models::{PerformanceCategory, PredictionResult, StudentRecord, StudentTable};

const ID_COLUMNS: [&str; 2] = ["student_id", "id"];
const LABEL_COLUMNS: [&str; 2] = ["performance_category", "performance_label"];

pub fn load_csv(path: &Path) -> Result<StudentTable> {
    let file = std::fs::File::open(path)?;
    let table = read_table(file)?;
    log::info!("loaded {} student rows from {}", table.len(), path.display());
    Ok(table)
}

/// Reads a headered CSV of student records. Unknown columns are ignored and
/// unreadable cells are treated as missing.
pub fn read_table<R: io::Read>(reader: R) -> Result<StudentTable> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = reader.headers()?.clone();

    let column = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };
    let id_column = column(&ID_COLUMNS);
    let label_column = column(&LABEL_COLUMNS);
    let feature_columns: Vec<(usize, Feature)> = headers
        .iter()
        .enumerate()
        .filter_map(|(idx, name)| Feature::from_name(name).map(|f| (idx, f)))
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let mut record = StudentRecord {
            student_id: id_column
                .and_then(|idx| row.get(idx))
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            label: label_column
                .and_then(|idx| row.get(idx))
                .and_then(PerformanceCategory::parse),
            ..StudentRecord::default()
        };
        for (idx, feature) in &feature_columns {
            record.set(*feature, row.get(*idx).and_then(parse_cell));
        }
        records.push(record);
    }

    Ok(StudentTable::with_columns(
        records,
        feature_columns.into_iter().map(|(_, f)| f),
        id_column.is_some(),
        label_column.is_some(),
    ))
}

fn parse_cell(raw: &str) -> Option<f64> {
    match raw {
        "" => None,
        v if v.eq_ignore_ascii_case("na") || v.eq_ignore_ascii_case("nan") => None,
        v => v.parse().ok(),
    }
}

/// Writes one row per prediction with `student_id,prediction,is_at_risk,confidence`.
pub fn write_predictions<W: io::Write>(writer: W, predictions: &[PredictionResult]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(["student_id", "prediction", "is_at_risk", "confidence"])?;
    for prediction in predictions {
        writer.write_record([
            prediction.student_id.clone(),
            prediction.prediction.to_string(),
            prediction.is_at_risk.to_string(),
            format!("{:.4}", prediction.confidence),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn export_predictions(path: &Path, predictions: &[PredictionResult]) -> Result<()> {
    write_predictions(std::fs::File::create(path)?, predictions)?;
    log::info!("wrote {} predictions to {}", predictions.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Prediction, PredictionSource};

    #[test]
    fn reads_features_ids_and_labels() {
        let raw = "\
student_id,Attendance,assignment_score,quiz_score,notes,performance_label
S1,90,85,88,keen,Excellent (A)
S2,,40,NA,quiet,
";
        let table = read_table(raw.as_bytes()).unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.has_column(Feature::Attendance));
        assert!(!table.has_column(Feature::TimeSpent));
        assert!(table.has_label_column());
        assert_eq!(table.student_id(1), "S2");

        let second = &table.records()[1];
        assert_eq!(second.attendance, None);
        assert_eq!(second.assignment_score, Some(40.0));
        assert_eq!(second.quiz_score, None);
        assert_eq!(second.label, None);
        assert_eq!(table.records()[0].label, Some(PerformanceCategory::Excellent));
    }

    #[test]
    fn header_only_file_is_an_empty_table() {
        let table = read_table("attendance,quiz_score\n".as_bytes()).unwrap();
        assert!(table.is_empty());
        assert!(table.has_column(Feature::QuizScore));
    }

    #[test]
    fn unparseable_cells_are_missing() {
        let table = read_table("quiz_score\nabc\n7.5\n".as_bytes()).unwrap();
        assert_eq!(table.records()[0].quiz_score, None);
        assert_eq!(table.records()[1].quiz_score, Some(7.5));
        assert_eq!(table.student_id(0), "Student_0");
    }

    #[test]
    fn writes_prediction_rows() {
        let predictions = vec![
            PredictionResult {
                student_id: "S1".to_string(),
                prediction: Prediction::Category(PerformanceCategory::AtRisk),
                is_at_risk: true,
                confidence: 0.7,
                source: PredictionSource::Rules,
            },
            PredictionResult::failed("S2".to_string(), "bad row"),
        ];
        let mut out = Vec::new();
        write_predictions(&mut out, &predictions).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "student_id,prediction,is_at_risk,confidence");
        assert_eq!(lines[1], "S1,At Risk,true,0.7000");
        assert_eq!(lines[2], "S2,Error,false,0.0000");
    }
}
