use rusqlite::Connection;

/// Opens a fresh in-memory store and creates the portal schema.
///
/// The store lives exactly as long as the connection, which is what
/// gives each daemon process (and each test) an isolated database.
pub fn open_store() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            password TEXT NOT NULL,
            role TEXT NOT NULL,
            avatar_url TEXT NOT NULL,
            grade_level INTEGER,
            student_no TEXT,
            enrollment_date TEXT,
            login_streak INTEGER,
            subject TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    // Email is deliberately not UNIQUE: multi-role accounts share one
    // email and auth.login returns every match. users.create enforces
    // uniqueness at the operation level instead.
    conn.execute("CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)", [])?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS achievements(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            icon TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_achievements_user ON achievements(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS master_assignments(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            title TEXT NOT NULL,
            subject TEXT NOT NULL,
            instructions TEXT NOT NULL,
            due_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_master_assignments_teacher ON master_assignments(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignment_targets(
            master_assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(master_assignment_id, student_id),
            FOREIGN KEY(master_assignment_id) REFERENCES master_assignments(id),
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignment_targets_student ON assignment_targets(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_assignments(
            id TEXT PRIMARY KEY,
            master_assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            title TEXT NOT NULL,
            subject TEXT NOT NULL,
            instructions TEXT NOT NULL,
            due_date TEXT NOT NULL,
            status TEXT NOT NULL,
            grade TEXT,
            feedback TEXT,
            submitted_at TEXT,
            is_exempt INTEGER NOT NULL DEFAULT 0,
            exemption_reason TEXT,
            FOREIGN KEY(master_assignment_id) REFERENCES master_assignments(id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            UNIQUE(master_assignment_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_assignments_master ON student_assignments(master_assignment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_assignments_student ON student_assignments(student_id)",
        [],
    )?;

    // Forum authors are stored as display snapshots alongside the id,
    // so deleting a user never dangles the forum read surface.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS forum_posts(
            id TEXT PRIMARY KEY,
            author_id TEXT NOT NULL,
            author_name TEXT NOT NULL,
            author_avatar_url TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            tags TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS forum_replies(
            id TEXT PRIMARY KEY,
            post_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            author_name TEXT NOT NULL,
            author_avatar_url TEXT NOT NULL,
            content TEXT NOT NULL,
            upvotes INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(post_id) REFERENCES forum_posts(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_forum_replies_post ON forum_replies(post_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS conversations(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            UNIQUE(student_id, teacher_id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            body TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(conversation_id) REFERENCES conversations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id)",
        [],
    )?;

    Ok(conn)
}
