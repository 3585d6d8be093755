/// Closed set of portal roles. Every stored user carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            _ => None,
        }
    }
}

/// The authenticated actor a request acts on behalf of. Supplied explicitly
/// with every operation; there is no ambient session state in the daemon.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

impl Principal {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Only students create submissions.
pub fn can_submit(principal: &Principal) -> bool {
    principal.role == Role::Student
}

/// Owner-or-grader read rule: the owning student and the assigned teacher
/// see a project; nobody else learns it exists.
pub fn can_read(principal: &Principal, student_id: &str, teacher_id: &str) -> bool {
    match principal.role {
        Role::Student => principal.id == student_id,
        Role::Teacher => principal.id == teacher_id,
    }
}

/// Downloads follow the read rule exactly.
pub fn can_download(principal: &Principal, student_id: &str, teacher_id: &str) -> bool {
    can_read(principal, student_id, teacher_id)
}

/// Grading is reserved to the assigned teacher.
pub fn can_grade(principal: &Principal, teacher_id: &str) -> bool {
    principal.role == Role::Teacher && principal.id == teacher_id
}
