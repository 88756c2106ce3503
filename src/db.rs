use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("madrasa.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            admission_no TEXT NOT NULL UNIQUE,
            guardian_phone TEXT,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    // Fee records carry the reconciled balance/status only. The paid total is
    // always derived from the payments table, never stored.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            period TEXT NOT NULL,
            total_billed REAL NOT NULL,
            balance REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, period)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_records_student ON fee_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            fee_record_id TEXT NOT NULL,
            amount REAL NOT NULL,
            method TEXT NOT NULL,
            reference TEXT,
            paid_on TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(fee_record_id) REFERENCES fee_records(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_fee_record ON payments(fee_record_id)",
        [],
    )?;

    // Assessment entries are append-only: re-entering a subject adds a row,
    // the collection aggregator sums duplicates.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            term TEXT NOT NULL,
            assessment_type TEXT NOT NULL,
            marks_obtained REAL NOT NULL,
            total_marks REAL NOT NULL,
            grade TEXT NOT NULL,
            finalized INTEGER NOT NULL DEFAULT 0,
            entered_by TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_student ON assessments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_term_type ON assessments(term, assessment_type)",
        [],
    )?;

    // Existing workspaces may predate these columns. Add if needed.
    ensure_students_guardian_phone(&conn)?;
    ensure_assessments_entered_by(&conn)?;
    ensure_payments_reference(&conn)?;

    Ok(conn)
}

fn ensure_students_guardian_phone(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "guardian_phone")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN guardian_phone TEXT", [])?;
    Ok(())
}

fn ensure_assessments_entered_by(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "assessments", "entered_by")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE assessments ADD COLUMN entered_by TEXT", [])?;
    Ok(())
}

fn ensure_payments_reference(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "payments", "reference")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE payments ADD COLUMN reference TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
