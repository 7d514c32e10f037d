//! Plain-text rendering of todos and notices.

use todobook_client::{Notice, NoticeLevel, Todo};

/// One todo as a short block: checkbox, id, title, then indented details.
pub fn format_todo(todo: &Todo) -> String {
    let mark = if todo.completed { "x" } else { " " };
    let mut out = format!(
        "[{mark}] {}  {}  ({})",
        todo.id,
        todo.title,
        todo.created_at.format("%Y-%m-%d %H:%M")
    );
    if !todo.content.is_empty() {
        for line in todo.content.lines() {
            out.push_str("\n      ");
            out.push_str(line);
        }
    }
    if let Some(url) = &todo.image_url {
        out.push_str("\n      image: ");
        out.push_str(url);
    }
    out
}

pub fn format_list(todos: &[Todo]) -> String {
    if todos.is_empty() {
        return "No todos yet.".to_string();
    }
    todos.iter().map(format_todo).collect::<Vec<_>>().join("\n")
}

pub fn format_notice(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Success => format!("ok: {notice}"),
        NoticeLevel::Error => format!("error: {notice}"),
    }
}
