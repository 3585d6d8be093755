pub const RUBRIC_CRITERION_MAX: i64 = 25;
pub const MAX_TOTAL_SCORE: i64 = 100;

/// Fixed letter-grade thresholds, highest first, first match wins:
/// >=90 A+, >=80 A, >=70 B+, >=60 B, >=50 C+, >=40 C, >=30 D, else F.
pub fn derive_letter_grade(score: i64) -> &'static str {
    if score >= 90 {
        "A+"
    } else if score >= 80 {
        "A"
    } else if score >= 70 {
        "B+"
    } else if score >= 60 {
        "B"
    } else if score >= 50 {
        "C+"
    } else if score >= 40 {
        "C"
    } else if score >= 30 {
        "D"
    } else {
        "F"
    }
}

/// Rank of a letter grade for ordering checks; A+ is 0, F is 7.
pub fn letter_grade_rank(letter: &str) -> i64 {
    match letter {
        "A+" => 0,
        "A" => 1,
        "B+" => 2,
        "B" => 3,
        "C+" => 4,
        "C" => 5,
        "D" => 6,
        _ => 7,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rubric {
    pub content: i64,
    pub presentation: i64,
    pub creativity: i64,
    pub technical: i64,
}

impl Rubric {
    pub fn total(&self) -> i64 {
        self.content + self.presentation + self.creativity + self.technical
    }

    /// Reconstructs a four-way split of an existing total for form prefill.
    /// Integer division with the remainder spread over the first fields; the
    /// original rubric breakdown is not stored, so this is an approximation.
    pub fn from_total(score: i64) -> Self {
        let base = score / 4;
        let rem = score % 4;
        Rubric {
            content: base + i64::from(rem > 0),
            presentation: base + i64::from(rem > 1),
            creativity: base + i64::from(rem > 2),
            technical: base,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectStatus {
    Pending,
    Graded,
    Overdue,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Pending => "pending",
            ProjectStatus::Graded => "graded",
            ProjectStatus::Overdue => "overdue",
        }
    }
}

/// Display label for one project: graded wins over overdue, overdue over
/// pending. An ungraded project past its due date is overdue only once
/// submitted. Timestamps are RFC3339 UTC, so string order is time order.
pub fn project_status(
    is_submitted: bool,
    has_grade: bool,
    due_date: &str,
    now: &str,
) -> ProjectStatus {
    if has_grade {
        ProjectStatus::Graded
    } else if is_submitted && due_date < now {
        ProjectStatus::Overdue
    } else {
        ProjectStatus::Pending
    }
}
