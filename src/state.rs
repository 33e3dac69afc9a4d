//! Cookie and web-storage inspection for the current page.

use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, CookieSameSite, DeleteCookiesParams,
};
use chromiumoxide::page::Page;
use log::debug;

use crate::actions::ToolError;

/// A cookie in display form.
#[derive(Debug, Clone)]
pub struct CookieInfo {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: String,
}

impl CookieInfo {
    pub fn format(&self) -> String {
        format!(
            "Name: {}\n  Value: {}\n  Domain: {}\n  Path: {}\n  Secure: {}\n  HttpOnly: {}\n  SameSite: {}",
            self.name,
            self.value,
            self.domain,
            self.path,
            self.secure,
            self.http_only,
            self.same_site,
        )
    }
}

/// Cookies visible to the current page.
pub async fn list_cookies(page: &Page) -> Result<Vec<CookieInfo>, ToolError> {
    let cookies = page.get_cookies().await?;
    Ok(cookies
        .into_iter()
        .map(|cookie| CookieInfo {
            name: cookie.name,
            value: cookie.value,
            domain: cookie.domain,
            path: cookie.path,
            secure: cookie.secure,
            http_only: cookie.http_only,
            same_site: same_site_name(cookie.same_site.as_ref()),
        })
        .collect())
}

fn same_site_name(same_site: Option<&CookieSameSite>) -> String {
    match same_site {
        Some(CookieSameSite::Strict) => "Strict".to_string(),
        Some(CookieSameSite::Lax) => "Lax".to_string(),
        Some(CookieSameSite::None) | None => "None".to_string(),
    }
}

/// Delete the cookies visible to the current page. Returns how many were
/// removed.
pub async fn clear_page_cookies(page: &Page) -> Result<usize, ToolError> {
    let cookies = page.get_cookies().await?;
    if cookies.is_empty() {
        return Ok(0);
    }

    let count = cookies.len();
    let deletions: Vec<DeleteCookiesParams> = cookies
        .iter()
        .map(|cookie| DeleteCookiesParams {
            name: cookie.name.clone(),
            url: None,
            domain: Some(cookie.domain.clone()),
            path: Some(cookie.path.clone()),
            partition_key: cookie.partition_key.clone(),
        })
        .collect();
    page.delete_cookies(deletions).await?;
    debug!("deleted {count} cookies");
    Ok(count)
}

/// Wipe cookies for every origin in the browser.
pub async fn clear_all_cookies(page: &Page) -> Result<(), ToolError> {
    page.execute(ClearBrowserCookiesParams::default()).await?;
    Ok(())
}

/// The two page storage areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageArea {
    Local,
    Session,
}

impl StorageArea {
    pub fn js_name(self) -> &'static str {
        match self {
            StorageArea::Local => "localStorage",
            StorageArea::Session => "sessionStorage",
        }
    }
}

/// Which storage areas the `--local`/`--session` flag pair selects. Both
/// flags (or neither) means both areas.
pub fn selected_areas(local: bool, session: bool) -> Vec<StorageArea> {
    if local && !session {
        vec![StorageArea::Local]
    } else if session && !local {
        vec![StorageArea::Session]
    } else {
        vec![StorageArea::Local, StorageArea::Session]
    }
}

/// Key/value pairs currently held in a storage area, in insertion order.
pub async fn storage_items(
    page: &Page,
    area: StorageArea,
) -> Result<Vec<(String, String)>, ToolError> {
    let js = format!(
        r#"(() => {{
            const store = {};
            const items = [];
            for (let i = 0; i < store.length; i++) {{
                const key = store.key(i);
                items.push([key, store.getItem(key)]);
            }}
            return items;
        }})()"#,
        area.js_name()
    );
    let items: Vec<(String, String)> = page
        .evaluate(js)
        .await?
        .into_value()
        .map_err(|err| ToolError::Protocol(format!("unexpected storage shape: {err}")))?;
    Ok(items)
}

/// Empty a storage area on the current page.
pub async fn clear_storage(page: &Page, area: StorageArea) -> Result<(), ToolError> {
    page.evaluate(format!("{}.clear()", area.js_name())).await?;
    Ok(())
}
