use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const ASSESSMENT_TYPES: [&str; 3] = ["Open-Term", "Mid-Term", "End-Term"];

pub fn normalize_assessment_type(raw: &str) -> Option<&'static str> {
    ASSESSMENT_TYPES
        .iter()
        .find(|t| t.eq_ignore_ascii_case(raw.trim()))
        .copied()
}

/// Who a collection or assessment listing is for. Public views must only see
/// finalized entries; an owner view is the entering teacher's own slice and
/// includes unfinalized rows. The aggregation functions below are agnostic to
/// this: callers apply the policy when loading entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    OwnerView,
    PublicView,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::OwnerView => "owner",
            Visibility::PublicView => "public",
        }
    }

    pub fn parse(raw: &str) -> Option<Visibility> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(Visibility::OwnerView),
            "public" => Some(Visibility::PublicView),
            _ => None,
        }
    }
}

/// Letter grade for one assessment entry, from the percentage score.
pub fn grade_for(marks_obtained: f64, total_marks: f64) -> &'static str {
    if !(total_marks > 0.0) || !marks_obtained.is_finite() {
        return "E";
    }
    let percent = 100.0 * marks_obtained / total_marks;
    if percent >= 80.0 {
        "A"
    } else if percent >= 70.0 {
        "B"
    } else if percent >= 60.0 {
        "C"
    } else if percent >= 50.0 {
        "D"
    } else {
        "E"
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn num(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// One raw assessment entry, already visibility-filtered by the caller.
#[derive(Debug, Clone)]
pub struct AssessmentEntry {
    pub student_id: String,
    pub subject: String,
    pub term: String,
    pub assessment_type: String,
    pub marks_obtained: f64,
}

/// Roster row for ranking. Order matters: rows enter the rank sort in roster
/// order, and the sort is stable, so equal totals keep this order.
#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub id: String,
    pub name: String,
    pub admission_no: String,
    pub class_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRow {
    pub student_id: String,
    pub student_name: String,
    pub admission_number: String,
    pub class_name: String,
    pub term: String,
    pub subject_marks: BTreeMap<String, f64>,
    pub total_marks: f64,
    pub rank: usize,
    pub total_students: usize,
}

/// One ranked row per student for a single assessment type within a term.
/// Students with no matching entry are omitted entirely; a re-entered subject
/// sums rather than overwrites. `total_students` counts emitted rows, not the
/// class roster.
pub fn generate_collection_rows(
    assessments: &[AssessmentEntry],
    students: &[RosterStudent],
    class_name: &str,
    term: &str,
) -> Vec<CollectionRow> {
    let mut rows: Vec<CollectionRow> = Vec::new();
    for student in students.iter().filter(|s| s.class_name == class_name) {
        let mut subject_marks: BTreeMap<String, f64> = BTreeMap::new();
        let mut matched = false;
        for entry in assessments
            .iter()
            .filter(|e| e.student_id == student.id && e.term == term)
        {
            matched = true;
            *subject_marks.entry(entry.subject.clone()).or_insert(0.0) +=
                num(entry.marks_obtained);
        }
        if !matched {
            continue;
        }
        let total_marks = subject_marks.values().sum();
        rows.push(CollectionRow {
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            admission_number: student.admission_no.clone(),
            class_name: class_name.to_string(),
            term: term.to_string(),
            subject_marks,
            total_marks,
            rank: 0,
            total_students: 0,
        });
    }
    rank_rows(rows)
}

/// "Average" view: per subject the mean over however many entries exist for
/// that subject (2-decimal rounding), summed across subjects. Spans all terms
/// for the selected assessment types.
pub fn generate_average_collection_rows(
    assessments: &[AssessmentEntry],
    students: &[RosterStudent],
    class_name: &str,
    assessment_types: &[String],
) -> Vec<CollectionRow> {
    let mut rows: Vec<CollectionRow> = Vec::new();
    for student in students.iter().filter(|s| s.class_name == class_name) {
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for entry in assessments.iter().filter(|e| {
            e.student_id == student.id
                && assessment_types.iter().any(|t| t == &e.assessment_type)
        }) {
            let slot = sums.entry(entry.subject.clone()).or_insert((0.0, 0));
            slot.0 += num(entry.marks_obtained);
            slot.1 += 1;
        }
        if sums.is_empty() {
            continue;
        }
        let subject_marks: BTreeMap<String, f64> = sums
            .into_iter()
            .map(|(subject, (sum, count))| (subject, round2(sum / count as f64)))
            .collect();
        let total_marks = round2(subject_marks.values().sum());
        rows.push(CollectionRow {
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            admission_number: student.admission_no.clone(),
            class_name: class_name.to_string(),
            term: "Average".to_string(),
            subject_marks,
            total_marks,
            rank: 0,
            total_students: 0,
        });
    }
    rank_rows(rows)
}

/// Stable sort descending by total, then dense 1-based ranks. Ties keep the
/// order the rows arrived in; equal totals get consecutive ranks, never equal
/// ones.
fn rank_rows(mut rows: Vec<CollectionRow>) -> Vec<CollectionRow> {
    rows.sort_by(|a, b| {
        b.total_marks
            .partial_cmp(&a.total_marks)
            .unwrap_or(Ordering::Equal)
    });
    let total = rows.len();
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
        row.total_students = total;
    }
    rows
}
