use chrono::{Duration, Utc};
use rusqlite::Connection;

use crate::catalog::{self, MasterTemplate, OpError};

const FIRST_NAMES: [&str; 20] = [
    "Liam", "Olivia", "Noah", "Emma", "Oliver", "Ava", "Elijah", "Charlotte", "William", "Sophia",
    "James", "Amelia", "Benjamin", "Isabella", "Lucas", "Mia", "Henry", "Evelyn", "Alexander",
    "Harper",
];
const LAST_NAMES: [&str; 20] = [
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Gonzalez", "Wilson", "Anderson", "Thomas", "Taylor",
    "Moore", "Jackson", "Martin",
];

#[derive(Debug)]
pub struct SeedCounts {
    pub users: usize,
    pub master_assignments: usize,
    pub student_assignments: usize,
    pub forum_posts: usize,
    pub conversations: usize,
}

struct SeedUser {
    id: String,
    name: String,
    email: String,
    password: String,
    role: &'static str,
    avatar_url: String,
    grade_level: Option<i64>,
    student_no: Option<String>,
    enrollment_date: Option<String>,
    login_streak: Option<i64>,
    subject: Option<String>,
}

fn insert_user(conn: &Connection, u: &SeedUser, created_at: &str) -> Result<(), OpError> {
    conn.execute(
        "INSERT INTO users(id, name, email, password, role, avatar_url,
            grade_level, student_no, enrollment_date, login_streak, subject, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &u.id,
            &u.name,
            &u.email,
            &u.password,
            u.role,
            &u.avatar_url,
            u.grade_level,
            &u.student_no,
            &u.enrollment_date,
            u.login_streak,
            &u.subject,
            created_at,
        ),
    )
    .map_err(|e| OpError::db("db_insert_failed", e))?;
    Ok(())
}

/// Deterministic two-part name; the index walks both pools on coprime
/// strides so consecutive students never share a full name.
fn generated_name(i: usize) -> String {
    format!(
        "{} {}",
        FIRST_NAMES[(i * 7) % FIRST_NAMES.len()],
        LAST_NAMES[(i * 13) % LAST_NAMES.len()]
    )
}

/// Loads the demo data set: the multi-role shared-email accounts, the
/// two standard accounts, one hundred generated students, two master
/// assignments fanned out through the real engine, one pre-graded
/// record, two forum threads and one conversation.
///
/// The set is fully deterministic apart from the master assignment ids
/// and the relative due dates, so tests can assert against it.
pub fn load_demo_data(conn: &Connection) -> Result<SeedCounts, OpError> {
    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .map_err(|e| OpError::db("db_query_failed", e))?;
    if existing > 0 {
        return Err(OpError::duplicate("store is already seeded"));
    }

    let now = Utc::now();
    let created_at = now.to_rfc3339();

    // Three roles behind one email: auth.login must surface all of
    // them. Inserted directly, the uniqueness rule lives in
    // users.create only.
    let aryan_avatar = "https://i.imgur.com/8b20GzT.png".to_string();
    let mut users = vec![
        SeedUser {
            id: "user-student-aryan".into(),
            name: "Aryan Sharma".into(),
            email: "aryan.s@school.edu".into(),
            password: "1234".into(),
            role: "student",
            avatar_url: aryan_avatar.clone(),
            grade_level: Some(7),
            student_no: Some("S78901".into()),
            enrollment_date: Some("2022-08-15".into()),
            login_streak: Some(23),
            subject: None,
        },
        SeedUser {
            id: "user-teacher-aryan".into(),
            name: "Aryan Sharma".into(),
            email: "aryan.s@school.edu".into(),
            password: "1234".into(),
            role: "teacher",
            avatar_url: aryan_avatar.clone(),
            grade_level: None,
            student_no: None,
            enrollment_date: None,
            login_streak: None,
            subject: Some("History".into()),
        },
        SeedUser {
            id: "user-admin-aryan".into(),
            name: "Aryan Sharma".into(),
            email: "aryan.s@school.edu".into(),
            password: "1234".into(),
            role: "admin",
            avatar_url: aryan_avatar,
            grade_level: None,
            student_no: None,
            enrollment_date: None,
            login_streak: None,
            subject: None,
        },
        SeedUser {
            id: "user-admin-1".into(),
            name: "Jane Doe".into(),
            email: "admin@test.com".into(),
            password: "password".into(),
            role: "admin",
            avatar_url: "https://i.pravatar.cc/150?u=admin".into(),
            grade_level: None,
            student_no: None,
            enrollment_date: None,
            login_streak: None,
            subject: None,
        },
        SeedUser {
            id: "user-teacher-1".into(),
            name: "John Smith".into(),
            email: "teacher@test.com".into(),
            password: "password".into(),
            role: "teacher",
            avatar_url: "https://i.pravatar.cc/150?u=teacher".into(),
            grade_level: None,
            student_no: None,
            enrollment_date: None,
            login_streak: None,
            subject: Some("History".into()),
        },
    ];

    let mut generated_ids = Vec::with_capacity(100);
    for i in 0..100 {
        let id = format!("user-student-{}", i + 1);
        let name = generated_name(i);
        users.push(SeedUser {
            email: format!("{}@school.edu", name.to_lowercase().replace(' ', ".")),
            name,
            password: "password".into(),
            role: "student",
            avatar_url: format!("https://i.pravatar.cc/150?u={id}"),
            grade_level: Some(7),
            student_no: Some(format!("S{}", 10000 + i)),
            enrollment_date: Some("2022-09-01".into()),
            login_streak: Some(((i * 11 + 5) % 30) as i64),
            subject: None,
            id: id.clone(),
        });
        generated_ids.push(id);
    }

    for u in &users {
        insert_user(conn, u, &created_at)?;
    }

    for (aid, name, description, icon) in [
        ("ach-1", "Perfect Score", "Got 100% on a test", "Trophy"),
        ("ach-2", "Helping Hand", "Answered 5 forum posts", "Star"),
    ] {
        conn.execute(
            "INSERT INTO achievements(id, user_id, name, description, icon)
             VALUES(?, 'user-student-aryan', ?, ?, ?)",
            (aid, name, description, icon),
        )
        .map_err(|e| OpError::db("db_insert_failed", e))?;
    }

    // Both masters go through the real fan-out engine rather than raw
    // inserts, so the seed exercises the same path callers use.
    let mut first_cohort = vec!["user-student-aryan".to_string()];
    first_cohort.extend(generated_ids[..50].iter().cloned());
    let ma1 = catalog::create_master_assignment(
        conn,
        &MasterTemplate {
            teacher_id: "user-teacher-aryan".into(),
            title: "The Roman Empire".into(),
            subject: "History".into(),
            instructions: "Write a 5-page essay on the rise and fall of the Roman Empire.".into(),
            due_date: (now + Duration::days(10)).to_rfc3339(),
            assigned_student_ids: first_cohort,
        },
        now,
    )?;

    let mut second_cohort = vec!["user-student-aryan".to_string()];
    second_cohort.extend(generated_ids[50..].iter().cloned());
    let ma2 = catalog::create_master_assignment(
        conn,
        &MasterTemplate {
            teacher_id: "user-teacher-1".into(),
            title: "World War II Causes".into(),
            subject: "History".into(),
            instructions: "Create a presentation on the main causes of World War II.".into(),
            due_date: (now + Duration::days(15)).to_rfc3339(),
            assigned_student_ids: second_cohort,
        },
        now,
    )?;

    // One already-graded record so grade-facing views have data on a
    // fresh seed.
    conn.execute(
        "UPDATE student_assignments SET status = 'Graded', grade = 'A+',
            feedback = 'Excellent work, Aryan! Your presentation was well-researched and clearly presented. One of the best I''ve seen.'
         WHERE id = ?",
        [catalog::student_assignment_id(&ma2.id, "user-student-aryan")],
    )
    .map_err(|e| OpError::db("db_update_failed", e))?;

    let posts = [
        (
            "post-1",
            "user-teacher-1",
            "John Smith",
            "https://i.pravatar.cc/150?u=teacher",
            "Tips for the Roman Empire essay",
            "Remember to cite primary sources where you can. The fall had more than one cause; pick a thread and argue it.",
            r#"["History","Essays"]"#,
        ),
        (
            "post-2",
            "user-student-aryan",
            "Aryan Sharma",
            "https://i.imgur.com/8b20GzT.png",
            "Study group for the WWII presentation?",
            "Anyone want to split up the causes and compare notes before the due date?",
            r#"["History","Study Groups"]"#,
        ),
    ];
    for (id, author_id, author_name, avatar, title, content, tags) in posts {
        conn.execute(
            "INSERT INTO forum_posts(id, author_id, author_name, author_avatar_url,
                title, content, tags, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (id, author_id, author_name, avatar, title, content, tags, &created_at),
        )
        .map_err(|e| OpError::db("db_insert_failed", e))?;
    }
    conn.execute(
        "INSERT INTO forum_replies(id, post_id, author_id, author_name, author_avatar_url,
            content, upvotes, created_at)
         VALUES('r-1', 'post-1', 'user-student-aryan', 'Aryan Sharma',
            'https://i.imgur.com/8b20GzT.png',
            'Does the essay need a bibliography page or inline citations?', 2, ?)",
        [&created_at],
    )
    .map_err(|e| OpError::db("db_insert_failed", e))?;

    conn.execute(
        "INSERT INTO conversations(id, student_id, teacher_id)
         VALUES('conv-1', 'user-student-aryan', 'user-teacher-1')",
        [],
    )
    .map_err(|e| OpError::db("db_insert_failed", e))?;
    conn.execute(
        "INSERT INTO messages(id, conversation_id, sender_id, body, sent_at, is_read)
         VALUES('msg-1', 'conv-1', 'user-student-aryan',
            'Thank you for the feedback on my presentation!', ?, 1)",
        [&created_at],
    )
    .map_err(|e| OpError::db("db_insert_failed", e))?;

    Ok(SeedCounts {
        users: users.len(),
        master_assignments: 2,
        student_assignments: ma1.fanned_out + ma2.fanned_out,
        forum_posts: posts.len(),
        conversations: 1,
    })
}
