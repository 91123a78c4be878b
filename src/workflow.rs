use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// The eight fixed BNCC curricular components. Completion is always computed
/// against this list, in this order, regardless of what the catalog holds.
pub const SUBJECTS: [Subject; 8] = [
    Subject::Port,
    Subject::Mat,
    Subject::Cien,
    Subject::Hist,
    Subject::Geo,
    Subject::Arte,
    Subject::Edfis,
    Subject::Rel,
];

pub const SUBJECT_COUNT: usize = SUBJECTS.len();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Port,
    Arte,
    Edfis,
    Mat,
    Cien,
    Geo,
    Hist,
    Rel,
}

impl Subject {
    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Port => "PORT",
            Subject::Arte => "ARTE",
            Subject::Edfis => "EDFIS",
            Subject::Mat => "MAT",
            Subject::Cien => "CIEN",
            Subject::Geo => "GEO",
            Subject::Hist => "HIST",
            Subject::Rel => "REL",
        }
    }

    /// Display names stay in Portuguese: they are BNCC domain vocabulary,
    /// not UI copy.
    pub fn display_name(self) -> &'static str {
        match self {
            Subject::Port => "Língua Portuguesa",
            Subject::Arte => "Arte",
            Subject::Edfis => "Educação Física",
            Subject::Mat => "Matemática",
            Subject::Cien => "Ciências",
            Subject::Geo => "Geografia",
            Subject::Hist => "História",
            Subject::Rel => "Ensino Religioso",
        }
    }

    pub fn parse(s: &str) -> Option<Subject> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PORT" => Some(Subject::Port),
            "ARTE" => Some(Subject::Arte),
            "EDFIS" => Some(Subject::Edfis),
            "MAT" => Some(Subject::Mat),
            "CIEN" => Some(Subject::Cien),
            "GEO" => Some(Subject::Geo),
            "HIST" => Some(Subject::Hist),
            "REL" => Some(Subject::Rel),
            _ => None,
        }
    }
}

pub const GRADE_LEVELS: [&str; 6] = ["EI", "1EF", "2EF", "3EF", "4EF", "5EF"];

pub fn is_grade_level(s: &str) -> bool {
    GRADE_LEVELS.contains(&s)
}

/// Competency rows store applicable grades as comma-joined text ("1EF, 2EF").
pub fn parse_grade_levels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().to_ascii_uppercase())
        .filter(|p| !p.is_empty())
        .collect()
}

pub fn applies_to_grade(raw: &str, grade_level: &str) -> bool {
    parse_grade_levels(raw).iter().any(|g| g == grade_level)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Teacher,
    Coordinator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Coordinator => "coordinator",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teacher" => Some(Role::Teacher),
            "coordinator" => Some(Role::Coordinator),
            _ => None,
        }
    }

    /// Approve/return reports and moderate the suggestion queue.
    pub fn can_review(self) -> bool {
        self == Role::Coordinator
    }

    pub fn can_moderate(self) -> bool {
        self == Role::Coordinator
    }

    /// Manage users, classes, the catalog and the system period.
    pub fn can_manage_school(self) -> bool {
        self == Role::Coordinator
    }

    /// Grade a report owned by `owner_id`. Coordinators bypass ownership.
    pub fn can_grade(self, owner_id: &str, requester_id: &str) -> bool {
        self == Role::Coordinator || owner_id == requester_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Draft,
    UnderReview,
    Approved,
    Returned,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::UnderReview => "under_review",
            ReportStatus::Approved => "approved",
            ReportStatus::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Option<ReportStatus> {
        match s {
            "draft" => Some(ReportStatus::Draft),
            "under_review" => Some(ReportStatus::UnderReview),
            "approved" => Some(ReportStatus::Approved),
            "returned" => Some(ReportStatus::Returned),
            _ => None,
        }
    }

    /// Assessment add/remove/grade is only legal in these states. The period
    /// gate is checked separately.
    pub fn is_editable(self) -> bool {
        matches!(self, ReportStatus::Draft | ReportStatus::Returned)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Rejected,
}

impl SuggestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Approved => "approved",
            SuggestionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<SuggestionStatus> {
        match s {
            "pending" => Some(SuggestionStatus::Pending),
            "approved" => Some(SuggestionStatus::Approved),
            "rejected" => Some(SuggestionStatus::Rejected),
            _ => None,
        }
    }
}

pub fn is_valid_level(level: i64) -> bool {
    (1..=5).contains(&level)
}

pub fn is_valid_trimester(t: &str) -> bool {
    matches!(t, "1" | "2" | "3")
}

/// Rejected suggestions older than this are swept permanently.
pub const SUGGESTION_RETENTION_DAYS: i64 = 30;

/// At most this many matched suggestions are attached per graded assessment.
pub const SUGGESTIONS_PER_ASSESSMENT: usize = 2;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectCompletion {
    pub subject: &'static str,
    pub assessed: usize,
    pub graded: usize,
    pub complete: bool,
}

/// Fold per-assessment rows `(subject, has_level)` into the fixed-subject
/// completion table. A subject is complete iff it has at least one assessment
/// and none of them is ungraded.
pub fn subject_completion<I>(rows: I) -> Vec<SubjectCompletion>
where
    I: IntoIterator<Item = (Subject, bool)>,
{
    let mut assessed = [0usize; SUBJECT_COUNT];
    let mut graded = [0usize; SUBJECT_COUNT];

    for (subject, has_level) in rows {
        let idx = SUBJECTS
            .iter()
            .position(|s| *s == subject)
            .unwrap_or_default();
        assessed[idx] += 1;
        if has_level {
            graded[idx] += 1;
        }
    }

    SUBJECTS
        .iter()
        .enumerate()
        .map(|(i, s)| SubjectCompletion {
            subject: s.as_str(),
            assessed: assessed[i],
            graded: graded[i],
            complete: assessed[i] > 0 && graded[i] == assessed[i],
        })
        .collect()
}

/// Overall percentage: complete subjects over the fixed eight, floored.
pub fn completion_percent(subjects: &[SubjectCompletion]) -> i64 {
    let complete = subjects.iter().filter(|s| s.complete).count();
    (100 * complete / SUBJECT_COUNT) as i64
}

/// Subjects that block submission: started but not fully graded. Untouched
/// subjects never block.
pub fn blocking_subjects(subjects: &[SubjectCompletion]) -> Vec<&'static str> {
    subjects
        .iter()
        .filter(|s| s.assessed > 0 && !s.complete)
        .map(|s| s.subject)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterStatus {
    NotStarted,
    NotDelivered,
    InProgress,
    UnderReview,
    Approved,
    Returned,
}

impl RosterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RosterStatus::NotStarted => "not_started",
            RosterStatus::NotDelivered => "not_delivered",
            RosterStatus::InProgress => "in_progress",
            RosterStatus::UnderReview => "under_review",
            RosterStatus::Approved => "approved",
            RosterStatus::Returned => "returned",
        }
    }
}

/// Per-student progress cell for the class roster, for a requested period
/// that may be historical. Submitted/reviewed reports always show 100%.
pub fn roster_progress(
    status: Option<ReportStatus>,
    live_percent: i64,
    requested_is_active: bool,
) -> (RosterStatus, i64) {
    match status {
        None if requested_is_active => (RosterStatus::NotStarted, 0),
        None => (RosterStatus::NotDelivered, 0),
        Some(ReportStatus::UnderReview) => (RosterStatus::UnderReview, 100),
        Some(ReportStatus::Approved) => (RosterStatus::Approved, 100),
        Some(ReportStatus::Returned) => (RosterStatus::Returned, 100),
        Some(ReportStatus::Draft) => (RosterStatus::InProgress, live_percent),
    }
}

/// The editing window is open when today falls inside the configured
/// [start, end] bounds; missing bounds do not constrain.
pub fn editing_window_open(
    today: NaiveDate,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> bool {
    if let Some(s) = start {
        if today < s {
            return false;
        }
    }
    if let Some(e) = end {
        if today > e {
            return false;
        }
    }
    true
}

pub fn sampling_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// Uniform sample without replacement of at most SUGGESTIONS_PER_ASSESSMENT
/// entries. Repeated views intentionally vary when the rng is not seeded.
pub fn sample_suggestions<T: Clone, R: Rng>(matches: &[T], rng: &mut R) -> Vec<T> {
    matches
        .choose_multiple(rng, SUGGESTIONS_PER_ASSESSMENT)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_counts_only_fully_graded_subjects() {
        let rows = vec![
            (Subject::Mat, true),
            (Subject::Mat, true),
            (Subject::Port, true),
            (Subject::Port, false),
            (Subject::Hist, false),
        ];
        let subjects = subject_completion(rows);

        let mat = subjects.iter().find(|s| s.subject == "MAT").unwrap();
        assert!(mat.complete);
        assert_eq!(mat.assessed, 2);
        assert_eq!(mat.graded, 2);

        let port = subjects.iter().find(|s| s.subject == "PORT").unwrap();
        assert!(!port.complete);

        let geo = subjects.iter().find(|s| s.subject == "GEO").unwrap();
        assert!(!geo.complete);
        assert_eq!(geo.assessed, 0);

        // 1 of 8 complete => 12%.
        assert_eq!(completion_percent(&subjects), 12);
        assert_eq!(blocking_subjects(&subjects), vec!["PORT", "HIST"]);
    }

    #[test]
    fn empty_report_is_zero_percent_and_never_blocks() {
        let subjects = subject_completion(Vec::new());
        assert_eq!(completion_percent(&subjects), 0);
        assert!(blocking_subjects(&subjects).is_empty());
    }

    #[test]
    fn grading_one_more_assessment_never_decreases_percent() {
        // Start with MAT half graded, then grade the second assessment.
        let before = subject_completion(vec![(Subject::Mat, true), (Subject::Mat, false)]);
        let after = subject_completion(vec![(Subject::Mat, true), (Subject::Mat, true)]);
        assert!(completion_percent(&after) >= completion_percent(&before));
    }

    #[test]
    fn roster_progress_labels() {
        assert_eq!(
            roster_progress(None, 0, true),
            (RosterStatus::NotStarted, 0)
        );
        assert_eq!(
            roster_progress(None, 0, false),
            (RosterStatus::NotDelivered, 0)
        );
        assert_eq!(
            roster_progress(Some(ReportStatus::Draft), 37, true),
            (RosterStatus::InProgress, 37)
        );
        assert_eq!(
            roster_progress(Some(ReportStatus::UnderReview), 37, true),
            (RosterStatus::UnderReview, 100)
        );
        assert_eq!(
            roster_progress(Some(ReportStatus::Approved), 0, false),
            (RosterStatus::Approved, 100)
        );
    }

    #[test]
    fn editing_window_bounds() {
        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        assert!(editing_window_open(d("2025-03-10"), None, None));
        assert!(editing_window_open(
            d("2025-03-10"),
            Some(d("2025-03-01")),
            Some(d("2025-03-31"))
        ));
        assert!(!editing_window_open(
            d("2025-02-20"),
            Some(d("2025-03-01")),
            None
        ));
        assert!(!editing_window_open(
            d("2025-04-01"),
            None,
            Some(d("2025-03-31"))
        ));
    }

    #[test]
    fn sampling_is_capped_uniform_and_seed_stable() {
        let pool: Vec<String> = (0..6).map(|i| format!("s{}", i)).collect();

        let mut rng = sampling_rng(Some(7));
        let picked = sample_suggestions(&pool, &mut rng);
        assert_eq!(picked.len(), 2);
        assert_ne!(picked[0], picked[1]);

        let mut rng2 = sampling_rng(Some(7));
        assert_eq!(picked, sample_suggestions(&pool, &mut rng2));

        let mut rng3 = sampling_rng(Some(7));
        let single = vec!["only".to_string()];
        assert_eq!(sample_suggestions(&single, &mut rng3), single);

        let empty: Vec<String> = Vec::new();
        assert!(sample_suggestions(&empty, &mut rng3).is_empty());
    }

    #[test]
    fn status_round_trips() {
        for s in [
            ReportStatus::Draft,
            ReportStatus::UnderReview,
            ReportStatus::Approved,
            ReportStatus::Returned,
        ] {
            assert_eq!(ReportStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ReportStatus::parse("RASCUNHO"), None);
        assert!(ReportStatus::Returned.is_editable());
        assert!(!ReportStatus::UnderReview.is_editable());
    }

    #[test]
    fn grade_level_parsing() {
        let parsed = parse_grade_levels(" 1EF, 2EF ,3ef");
        assert_eq!(parsed, vec!["1EF", "2EF", "3EF"]);
        assert!(applies_to_grade("1EF, 2EF", "2EF"));
        assert!(!applies_to_grade("1EF, 2EF", "5EF"));
    }
}
