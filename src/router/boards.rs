use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
};

use axum::{
    extract::{ConnectInfo, Multipart, Path, State},
    http::{header, HeaderName},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    TypedHeader,
};

use crate::{
    board::Board,
    context::{now, RequestContext},
    error::PostError,
    pipeline::{upload::Upload, DeleteRequest, EditRequest, ReportRequest, Submission},
};

use super::{error, headers::XForwardedFor, AppState};

const COOKIE_MAX_AGE: i64 = 14 * 24 * 3600;

/// A parsed multipart form: text fields, the `delete` checkboxes and the file.
#[derive(Default)]
struct PostForm {
    fields: HashMap<String, String>,
    posts: Vec<i64>,
    file: Option<Upload>,
}

impl PostForm {
    fn text(&self, key: &str) -> String {
        self.fields.get(key).cloned().unwrap_or_default()
    }

    fn flag(&self, key: &str) -> bool {
        self.fields.get(key).map_or(false, |v| !v.is_empty())
    }

    fn num(&self, key: &str) -> Result<i64, PostError> {
        match self.fields.get(key).map(|v| v.trim()) {
            None | Some("") => Ok(0),
            Some(v) => v.parse().map_err(|_| PostError::NoThread),
        }
    }
}

async fn read_post_mp(mut mp: Multipart) -> Result<PostForm, axum::extract::multipart::MultipartError> {
    let mut form = PostForm::default();
    while let Some(field) = mp.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?.to_vec();
                form.file = Some(Upload { filename, data });
            }
            "delete" => {
                if let Ok(num) = field.text().await?.trim().parse() {
                    form.posts.push(num);
                }
            }
            _ => {
                let value = field.text().await?;
                form.fields.insert(name, value);
            }
        }
    }
    Ok(form)
}

fn cookie_escape(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

fn cookies(board: &Board, form: &PostForm) -> Vec<(HeaderName, String)> {
    let path = board.cookie_path();
    ["name", "email", "password"]
        .into_iter()
        .map(|key| {
            let value = cookie_escape(&form.text(key));
            (
                header::SET_COOKIE,
                format!("{key}={value}; Path={path}; Max-Age={COOKIE_MAX_AGE}"),
            )
        })
        .collect()
}

fn request_context(state: &AppState, peer: SocketAddr, xff: Option<TypedHeader<XForwardedFor>>, form: &PostForm) -> Result<RequestContext, PostError> {
    let ip: IpAddr = xff.and_then(|TypedHeader(h)| h.client()).unwrap_or(peer.ip());
    let ctx = RequestContext::new(ip, now());
    let admin = form.text("admin");
    if admin.is_empty() {
        return Ok(ctx);
    }
    match &state.site.cfg.staff_password {
        Some(password) if !password.is_empty() && *password == admin => Ok(ctx.staff("admin")),
        _ => {
            tracing::warn!(target: "moderation", "Bad staff password from {ip}");
            Err(PostError::NotElevated)
        }
    }
}

pub async fn handle_action(
    State(state): State<AppState>,
    Path((board_name, action)): Path<(String, String)>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    xff: Option<TypedHeader<XForwardedFor>>,
    mp: Multipart,
) -> Response {
    let Some(board) = state.site.board(&board_name) else {
        return error::http_404();
    };
    let form = match read_post_mp(mp).await {
        Ok(form) => form,
        Err(e) => {
            tracing::debug!("Malformed form: {e}");
            return error::http_400();
        }
    };
    let ctx = match request_context(&state, peer, xff, &form) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };

    let result = match action.trim_matches('/') {
        "post" => submit(&state, board, ctx, form).await,
        "edit" => edit(&state, board, ctx, form).await,
        "delete" => {
            let req = DeleteRequest {
                password: form.text("password"),
                file_only: form.flag("fileonly"),
                posts: form.posts,
            };
            state
                .db
                .delete_posts(board_name, ctx, req)
                .await
                .map(|_| Redirect::to(board.url()).into_response())
        }
        "report" => {
            let req = ReportRequest {
                reason: form.text("reason"),
                posts: form.posts,
            };
            state
                .db
                .report_posts(board_name, ctx, req)
                .await
                .map(|_| Redirect::to(board.url()).into_response())
        }
        _ => return error::http_404(),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

async fn submit(state: &AppState, board: &Board, ctx: RequestContext, form: PostForm) -> Result<Response, PostError> {
    let sub = Submission {
        parent: form.num("parent")?,
        name: form.text("name"),
        email: form.text("email"),
        subject: form.text("subject"),
        comment: form.text("comment"),
        password: form.text("password"),
        nofile: form.flag("nofile"),
        file: form.file.clone(),
        no_format: form.flag("no_format"),
    };
    let outcome = state.db.submit_post(board.name.clone(), ctx, sub).await?;
    Ok((AppendHeaders(cookies(board, &form)), Redirect::to(&outcome.redirect)).into_response())
}

async fn edit(state: &AppState, board: &Board, ctx: RequestContext, mut form: PostForm) -> Result<Response, PostError> {
    let req = EditRequest {
        num: form.num("num")?,
        password: form.text("password"),
        name: form.text("name"),
        email: form.text("email"),
        subject: form.text("subject"),
        comment: form.text("comment"),
        no_format: form.flag("no_format"),
        file: form.file.take(),
    };
    let outcome = state.db.edit_post(board.name.clone(), ctx, req).await?;
    Ok(Redirect::to(&outcome.redirect).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_values_are_escaped() {
        assert_eq!(cookie_escape("Anon#trip"), "Anon%23trip");
        assert_eq!(cookie_escape("a b;c"), "a%20b%3Bc");
    }

    #[test]
    fn empty_numbers_mean_a_new_thread() {
        let mut form = PostForm::default();
        assert_eq!(form.num("parent").unwrap(), 0);
        form.fields.insert("parent".into(), "12".into());
        assert_eq!(form.num("parent").unwrap(), 12);
        form.fields.insert("parent".into(), "x".into());
        assert!(form.num("parent").is_err());
    }

    #[test]
    fn taking_the_file_keeps_the_text_fields() {
        let mut form = PostForm::default();
        form.fields.insert("no_format".into(), "on".into());
        form.file = Some(Upload {
            filename: "cat.png".into(),
            data: vec![1, 2, 3],
        });
        let file = form.file.take();
        assert_eq!(file.map(|f| f.data), Some(vec![1, 2, 3]));
        assert!(form.flag("no_format"));
        assert!(form.file.is_none());
    }
}
