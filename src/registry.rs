//! Statement registry: the statement-definition file grammar, and
//! result-column metadata probing against a live MySQL connection.
//!
//! The on-disk format is line-oriented: `#` starts a comment, blank lines
//! terminate a (possibly multi-line) SQL definition, `include <file>` pulls
//! in another file relative to the same directory (cycle-checked), and a
//! name line may carry an `insert-id` (or `insert_id`) flag meaning "this
//! statement returns no rows, read back `LAST_INSERT_ID()` instead".
//! `$name.` within a SQL body expands to a configured database name.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use mysql::prelude::Queryable;
use mysql::{Conn, Opts};

/// How a result column's bytes should be rendered to JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindType {
    Null,
    Integer,
    UnsignedInt,
    Float,
    Text,
    Binary,
    Timestamp,
}

/// One parsed and (unless `insert_id`) metadata-probed statement.
#[derive(Debug, Clone)]
pub struct StatementDef {
    pub name: String,
    pub sql: String,
    pub insert_id: bool,
    pub file: String,
    pub lineno: usize,
    /// `true` once probing has established this statement returns rows.
    pub is_query: bool,
    /// Column render types, in result order. Empty for non-queries.
    pub results: Vec<BindType>,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{0}:{1}: circular inclusion of statement files")]
    CircularInclude(String, usize),
    #[error("failed to open statements file: {0}")]
    OpenFailed(String, #[source] std::io::Error),
    #[error("{0}:{1}: sql name should not be empty")]
    EmptyName(String, usize),
    #[error("{file}:{lineno}: {name}: {source}")]
    DbVarExpansion { file: String, lineno: usize, name: String, source: ExpandError },
    #[error("{0}:{1}: {2}: failed to init result info: {3}")]
    MetadataProbe(String, usize, String, mysql::Error),
    #[error("{0}:{1}: {2}: unsupported column type in results")]
    UnsupportedColumn(String, usize, String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    #[error("incorrect use of db name variable")]
    Unterminated,
    #[error("unknown db name variable: {0}")]
    Unknown(String),
}

/// Expand `$name.` occurrences in `sql` using `find_db`.
///
/// # Errors
/// Returns [`ExpandError`] if a `$` is not followed by a `.`, or if
/// `find_db` has no entry for the named variable.
pub fn expand_dbs(sql: &str, find_db: impl Fn(&str) -> Option<String>) -> Result<String, ExpandError> {
    if !sql.contains('$') {
        return Ok(sql.to_owned());
    }

    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    loop {
        let Some(dollar_rel) = sql[last..].find('$') else { break };
        let dollar = last + dollar_rel;
        let Some(dot_rel) = sql[dollar + 1..].find('.') else {
            return Err(ExpandError::Unterminated);
        };
        let dot = dollar + 1 + dot_rel;
        let var = &sql[dollar + 1..dot];
        let db = find_db(var).ok_or_else(|| ExpandError::Unknown(var.to_owned()))?;
        out.push_str(&sql[last..dollar]);
        out.push_str(&db);
        last = dot;
    }
    out.push_str(&sql[last..]);
    Ok(out)
}

/// Load a statement registry starting from `dir/fn`, then probe every
/// non-`insert_id` statement's result metadata against `conn`, reconnecting
/// via `opts` between failed probe attempts.
///
/// # Errors
/// Returns [`LoadError`] on grammar violations, missing files, circular
/// includes, unresolved `$var.` expansions, or metadata probe failures
/// that survive the retry budget.
pub fn load(
    dir: &Path,
    fname: &str,
    conn: &mut Conn,
    opts: &Opts,
    find_db: impl Fn(&str) -> Option<String> + Copy,
) -> Result<HashMap<String, StatementDef>, LoadError> {
    let mut stmts = HashMap::new();
    let mut including = HashSet::new();
    read_stmts(&mut stmts, dir, fname, &mut including, find_db)?;

    for stmt in stmts.values_mut() {
        probe_metadata(stmt, conn, opts)?;
    }

    Ok(stmts)
}

fn read_stmts(
    stmts: &mut HashMap<String, StatementDef>,
    dir: &Path,
    fname: &str,
    including: &mut HashSet<PathBuf>,
    find_db: impl Fn(&str) -> Option<String> + Copy,
) -> Result<(), LoadError> {
    let path = if Path::new(fname).is_absolute() { PathBuf::from(fname) } else { dir.join(fname) };
    let display = path.display().to_string();

    if !including.insert(path.clone()) {
        return Err(LoadError::CircularInclude(display, 0));
    }

    let text = std::fs::read_to_string(&path).map_err(|e| LoadError::OpenFailed(display.clone(), e))?;

    let mut name = String::new();
    let mut sql = String::new();
    let mut insert_id = false;
    let mut start_lineno = 0usize;

    for (idx, raw_line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let line = match raw_line.find('#') {
            Some(pound) => &raw_line[..pound],
            None => raw_line,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !sql.is_empty() {
                finish_stmt(stmts, &name, &sql, insert_id, &display, start_lineno, find_db)?;
                name.clear();
                sql.clear();
                insert_id = false;
            }
            continue;
        }

        if !name.is_empty() {
            sql.push(' ');
            sql.push_str(trimmed);
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("include") {
            if rest.starts_with(|c: char| c.is_whitespace()) {
                let included = rest.trim();
                read_stmts(stmts, dir, included, including, find_db)?;
                continue;
            }
        }

        start_lineno = lineno;
        match trimmed.split_once([':', ' ', '\t']) {
            None => name = trimmed.to_owned(),
            Some((n, flags)) => {
                name = n.to_owned();
                let flags = flags.trim();
                if flags == "insert-id" || flags == "insert_id" {
                    insert_id = true;
                }
            }
        }

        if name.is_empty() {
            return Err(LoadError::EmptyName(display, lineno));
        }
    }

    if !name.is_empty() && !sql.is_empty() {
        finish_stmt(stmts, &name, &sql, insert_id, &display, start_lineno, find_db)?;
    }

    including.remove(&path);
    Ok(())
}

fn finish_stmt(
    stmts: &mut HashMap<String, StatementDef>,
    name: &str,
    sql: &str,
    insert_id: bool,
    file: &str,
    lineno: usize,
    find_db: impl Fn(&str) -> Option<String>,
) -> Result<(), LoadError> {
    let expanded = expand_dbs(sql.trim(), find_db).map_err(|source| LoadError::DbVarExpansion {
        file: file.to_owned(),
        lineno,
        name: name.to_owned(),
        source,
    })?;

    if stmts.contains_key(name) {
        tracing::warn!(%file, lineno, %name, "statement with the same name already defined, overwriting");
    }

    stmts.insert(
        name.to_owned(),
        StatementDef {
            name: name.to_owned(),
            sql: expanded,
            insert_id,
            file: file.to_owned(),
            lineno,
            is_query: true,
            results: Vec::new(),
        },
    );
    Ok(())
}

fn probe_metadata(stmt: &mut StatementDef, conn: &mut Conn, opts: &Opts) -> Result<(), LoadError> {
    if stmt.insert_id {
        return Ok(());
    }

    const ATTEMPTS: u32 = 3;
    let mut last_err = None;
    for attempt in 0..ATTEMPTS {
        if attempt > 0 {
            tracing::warn!(file = %stmt.file, lineno = stmt.lineno, name = %stmt.name, "reconnecting before retrying result probe");
            match Conn::new(opts.clone()) {
                Ok(reconnected) => *conn = reconnected,
                Err(reconnect_err) => {
                    tracing::warn!(file = %stmt.file, lineno = stmt.lineno, name = %stmt.name, error = %reconnect_err, "failed to reconnect while retrying result probe");
                    last_err = Some(reconnect_err);
                    continue;
                }
            }
        }

        match conn.prep(&stmt.sql) {
            Ok(prepared) => {
                let columns = prepared.columns();
                let mut results = Vec::with_capacity(columns.len());
                for col in columns.iter() {
                    match translate_type(col) {
                        Some(bt) => results.push(bt),
                        None => {
                            return Err(LoadError::UnsupportedColumn(
                                stmt.file.clone(),
                                stmt.lineno,
                                stmt.name.clone(),
                            ))
                        }
                    }
                }
                stmt.is_query = !results.is_empty();
                stmt.results = results;
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(file = %stmt.file, lineno = stmt.lineno, name = %stmt.name, error = %e, "failed to init result info, will reconnect and retry");
                last_err = Some(e);
            }
        }
    }

    Err(LoadError::MetadataProbe(
        stmt.file.clone(),
        stmt.lineno,
        stmt.name.clone(),
        last_err.unwrap_or_else(|| unreachable!("loop runs at least once")),
    ))
}

fn translate_type(col: &mysql::Column) -> Option<BindType> {
    use mysql::consts::ColumnType as CT;
    use mysql::consts::ColumnFlags;

    let unsigned = col.flags().contains(ColumnFlags::UNSIGNED_FLAG);
    match col.column_type() {
        CT::MYSQL_TYPE_NULL => Some(BindType::Null),
        CT::MYSQL_TYPE_TINY
        | CT::MYSQL_TYPE_SHORT
        | CT::MYSQL_TYPE_LONG
        | CT::MYSQL_TYPE_INT24
        | CT::MYSQL_TYPE_LONGLONG => Some(if unsigned { BindType::UnsignedInt } else { BindType::Integer }),
        CT::MYSQL_TYPE_FLOAT | CT::MYSQL_TYPE_DOUBLE => Some(BindType::Float),
        CT::MYSQL_TYPE_STRING
        | CT::MYSQL_TYPE_VAR_STRING
        | CT::MYSQL_TYPE_VARCHAR
        | CT::MYSQL_TYPE_ENUM
        | CT::MYSQL_TYPE_SET
        | CT::MYSQL_TYPE_DECIMAL
        | CT::MYSQL_TYPE_NEWDECIMAL => Some(BindType::Text),
        CT::MYSQL_TYPE_BLOB
        | CT::MYSQL_TYPE_TINY_BLOB
        | CT::MYSQL_TYPE_MEDIUM_BLOB
        | CT::MYSQL_TYPE_LONG_BLOB => Some(BindType::Binary),
        CT::MYSQL_TYPE_DATE | CT::MYSQL_TYPE_TIME | CT::MYSQL_TYPE_DATETIME | CT::MYSQL_TYPE_TIMESTAMP => {
            Some(BindType::Timestamp)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use rstest::rstest;
    use tempfile::tempdir;

    use super::*;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).expect("create");
        f.write_all(contents.as_bytes()).expect("write");
    }

    #[rstest]
    fn expands_single_db_var() {
        let out = expand_dbs("select * from $main.users", |v| {
            (v == "main").then(|| "prod".to_owned())
        })
        .expect("expand");
        assert_eq!(out, "select * from prod.users");
    }

    #[rstest]
    fn expand_without_dollar_is_noop() {
        let out = expand_dbs("select 1", |_| None).expect("expand");
        assert_eq!(out, "select 1");
    }

    #[rstest]
    fn expand_unterminated_errors() {
        let err = expand_dbs("select $main", |_| Some("x".to_owned())).expect_err("must fail");
        assert!(matches!(err, ExpandError::Unterminated));
    }

    #[rstest]
    fn expand_unknown_var_errors() {
        let err = expand_dbs("select $nope.t", |_| None).expect_err("must fail");
        assert!(matches!(err, ExpandError::Unknown(_)));
    }

    #[rstest]
    fn parses_simple_statement_file() {
        let dir = tempdir().expect("tempdir");
        write_file(
            dir.path(),
            "stmts.txt",
            "# a comment\nget_user\n  select * from users where id = ?\n\n",
        );

        let mut stmts = HashMap::new();
        let mut including = HashSet::new();
        read_stmts(&mut stmts, dir.path(), "stmts.txt", &mut including, |_| None).expect("read");

        let def = stmts.get("get_user").expect("present");
        assert_eq!(def.sql, "select * from users where id = ?");
        assert!(!def.insert_id);
    }

    #[rstest]
    fn parses_insert_id_flag() {
        let dir = tempdir().expect("tempdir");
        write_file(
            dir.path(),
            "stmts.txt",
            "add_user: insert-id\n  insert into users (name) values (?)\n\n",
        );

        let mut stmts = HashMap::new();
        let mut including = HashSet::new();
        read_stmts(&mut stmts, dir.path(), "stmts.txt", &mut including, |_| None).expect("read");

        assert!(stmts.get("add_user").expect("present").insert_id);
    }

    #[rstest]
    fn follows_include_directive() {
        let dir = tempdir().expect("tempdir");
        write_file(dir.path(), "child.txt", "from_child\n  select 1\n\n");
        write_file(dir.path(), "parent.txt", "include child.txt\n");

        let mut stmts = HashMap::new();
        let mut including = HashSet::new();
        read_stmts(&mut stmts, dir.path(), "parent.txt", &mut including, |_| None).expect("read");

        assert!(stmts.contains_key("from_child"));
    }

    #[rstest]
    fn detects_circular_include() {
        let dir = tempdir().expect("tempdir");
        write_file(dir.path(), "a.txt", "include b.txt\n");
        write_file(dir.path(), "b.txt", "include a.txt\n");

        let mut stmts = HashMap::new();
        let mut including = HashSet::new();
        let err = read_stmts(&mut stmts, dir.path(), "a.txt", &mut including, |_| None).expect_err("must fail");
        assert!(matches!(err, LoadError::CircularInclude(..)));
    }

    #[rstest]
    fn duplicate_name_overwrites_last_definition() {
        let dir = tempdir().expect("tempdir");
        write_file(dir.path(), "stmts.txt", "dup\n  select 1\n\ndup\n  select 2\n\n");

        let mut stmts = HashMap::new();
        let mut including = HashSet::new();
        read_stmts(&mut stmts, dir.path(), "stmts.txt", &mut including, |_| None).expect("read");

        assert_eq!(stmts.get("dup").expect("present").sql, "select 2");
        assert_eq!(stmts.len(), 1);
    }

    #[rstest]
    fn multi_line_sql_is_joined_with_spaces() {
        let dir = tempdir().expect("tempdir");
        write_file(dir.path(), "stmts.txt", "long\n  select *\n  from users\n  where id = ?\n\n");

        let mut stmts = HashMap::new();
        let mut including = HashSet::new();
        read_stmts(&mut stmts, dir.path(), "stmts.txt", &mut including, |_| None).expect("read");

        assert_eq!(stmts.get("long").expect("present").sql, "select * from users where id = ?");
    }
}
