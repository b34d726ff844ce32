//! Spreadsheet collaborator.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::error::{Error, Result};

/// Spreadsheet copied for every new puzzle.
pub const DEFAULT_TEMPLATE_ID: &str = "1IqR4EcKA7gkxvveIzPCgcbcWUozMbsQwDXbKcQaPH9U";

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/";

const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";

/// Columns written by [`SheetService::write_rows`] and read by
/// [`SheetService::header`].
const COLUMNS: usize = 3;

/// One tab of a spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetTab {
    pub id: i64,
    pub title: String,
}

/// Creates puzzle spreadsheets and fills in tabs of existing ones.
#[async_trait]
pub trait SheetService: Send + Sync {
    /// Create a sheet named `name` inside `folder_id`, returning its id.
    async fn create_sheet(&self, name: &str, folder_id: &str) -> Result<String>;

    /// Tabs of `spreadsheet_id` in display order.
    async fn tabs(&self, spreadsheet_id: &str) -> Result<Vec<SheetTab>>;

    /// First row of `tab`, at most three cells. Empty when the tab is blank.
    async fn header(&self, spreadsheet_id: &str, tab: &str) -> Result<Vec<String>>;

    /// Append a tab titled `title` with a bold header row and monospace
    /// body in the first two columns.
    async fn add_tab(&self, spreadsheet_id: &str, title: &str) -> Result<SheetTab>;

    /// Overwrite the first three columns of `tab` with `rows`. Cells are
    /// parsed as if typed, so formulas are evaluated.
    async fn write_rows(&self, spreadsheet_id: &str, tab: &str, rows: &[Vec<String>]) -> Result<()>;
}

struct TabContents {
    tab: SheetTab,
    rows: Vec<Vec<String>>,
}

/// Records created sheets instead of calling out.
#[derive(Default)]
pub struct InMemorySheets {
    created: Mutex<Vec<(String, String)>>,
    tabs: Mutex<BTreeMap<String, Vec<TabContents>>>,
    failing: AtomicBool,
}

impl InMemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(name, folder)` of every sheet created so far.
    pub fn created(&self) -> Vec<(String, String)> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make subsequent calls fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Contents of `tab`, `None` when the tab does not exist.
    pub fn rows(&self, spreadsheet_id: &str, tab: &str) -> Option<Vec<Vec<String>>> {
        let tabs = self.tabs.lock().unwrap_or_else(PoisonError::into_inner);
        tabs.get(spreadsheet_id)?
            .iter()
            .find(|contents| contents.tab.title == tab)
            .map(|contents| contents.rows.clone())
    }

    /// Create `tab` holding `rows`, as if someone had edited the sheet.
    pub fn insert_tab(&self, spreadsheet_id: &str, tab: &str, rows: Vec<Vec<String>>) {
        let mut tabs = self.tabs.lock().unwrap_or_else(PoisonError::into_inner);
        let sheet = tabs.entry(spreadsheet_id.to_string()).or_default();
        let id = next_tab_id(sheet);
        sheet.push(TabContents {
            tab: SheetTab {
                id,
                title: tab.to_string(),
            },
            rows,
        });
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::sheet("sheet service unavailable"));
        }
        Ok(())
    }
}

fn next_tab_id(sheet: &[TabContents]) -> i64 {
    sheet.iter().map(|contents| contents.tab.id).max().unwrap_or(0) + 1
}

#[async_trait]
impl SheetService for InMemorySheets {
    async fn create_sheet(&self, name: &str, folder_id: &str) -> Result<String> {
        self.check_available()?;
        let mut created = self.created.lock().unwrap_or_else(PoisonError::into_inner);
        created.push((name.to_string(), folder_id.to_string()));
        Ok(format!("sheet-{}", created.len()))
    }

    async fn tabs(&self, spreadsheet_id: &str) -> Result<Vec<SheetTab>> {
        self.check_available()?;
        let tabs = self.tabs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tabs
            .get(spreadsheet_id)
            .map(|sheet| sheet.iter().map(|contents| contents.tab.clone()).collect())
            .unwrap_or_default())
    }

    async fn header(&self, spreadsheet_id: &str, tab: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let rows = self
            .rows(spreadsheet_id, tab)
            .ok_or_else(|| Error::not_found("tab", tab))?;
        Ok(rows
            .first()
            .map(|row| row.iter().take(COLUMNS).cloned().collect())
            .unwrap_or_default())
    }

    async fn add_tab(&self, spreadsheet_id: &str, title: &str) -> Result<SheetTab> {
        self.check_available()?;
        self.insert_tab(spreadsheet_id, title, Vec::new());
        self.tabs(spreadsheet_id)
            .await?
            .into_iter()
            .rev()
            .find(|tab| tab.title == title)
            .ok_or_else(|| Error::not_found("tab", title))
    }

    async fn write_rows(&self, spreadsheet_id: &str, tab: &str, rows: &[Vec<String>]) -> Result<()> {
        self.check_available()?;
        let mut tabs = self.tabs.lock().unwrap_or_else(PoisonError::into_inner);
        let contents = tabs
            .get_mut(spreadsheet_id)
            .and_then(|sheet| sheet.iter_mut().find(|contents| contents.tab.title == tab))
            .ok_or_else(|| Error::not_found("tab", tab))?;
        contents.rows = rows
            .iter()
            .map(|row| row.iter().take(COLUMNS).cloned().collect())
            .collect();
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CopyRequest<'a> {
    name: &'a str,
    parents: [&'a str; 1],
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct CopyResponse {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabProperties {
    sheet_id: i64,
    title: String,
}

impl From<TabProperties> for SheetTab {
    fn from(properties: TabProperties) -> Self {
        Self {
            id: properties.sheet_id,
            title: properties.title,
        }
    }
}

#[derive(Deserialize)]
struct WireTab {
    properties: TabProperties,
}

#[derive(Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<WireTab>,
}

#[derive(Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddSheetReply {
    add_sheet: WireTab,
}

#[derive(Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    replies: Vec<AddSheetReply>,
}

/// Copies a template spreadsheet through the Drive v3 API and edits
/// spreadsheets through the Sheets v4 API.
pub struct DriveSheets {
    client: reqwest::Client,
    base_url: Url,
    sheets_base: Url,
    access_token: String,
    template_id: String,
}

impl DriveSheets {
    /// # Errors
    ///
    /// Fails when `base_url` is not a valid URL.
    pub fn new(base_url: &str, access_token: impl Into<String>, template_id: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| Error::invalid_config(e.to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            sheets_base: Url::parse(SHEETS_API_BASE).map_err(|e| Error::invalid_config(e.to_string()))?,
            access_token: access_token.into(),
            template_id: template_id.into(),
        })
    }

    /// Point spreadsheet edits at `base_url` instead of [`SHEETS_API_BASE`].
    ///
    /// # Errors
    ///
    /// Fails when `base_url` is not a valid URL.
    pub fn with_sheets_base(mut self, base_url: &str) -> Result<Self> {
        self.sheets_base = Url::parse(base_url).map_err(|e| Error::invalid_config(e.to_string()))?;
        Ok(self)
    }

    /// `v4/spreadsheets/{id}` followed by `segments`, each percent-encoded.
    fn spreadsheet_url(&self, spreadsheet_id: &str, segments: &[&str]) -> Result<Url> {
        let mut url = self.sheets_base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::sheet(format!("{} cannot be a base", self.sheets_base)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", spreadsheet_id])
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| Error::sheet(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::sheet(format!("sheets returned {}", response.status())));
        }
        response.json().await.map_err(|e| Error::sheet(e.to_string()))
    }

    async fn batch_update(&self, spreadsheet_id: &str, requests: serde_json::Value) -> Result<BatchUpdateResponse> {
        let url = self.spreadsheet_url(&format!("{spreadsheet_id}:batchUpdate"), &[])?;
        self.send(self.client.post(url).json(&json!({ "requests": requests })))
            .await
    }
}

/// A1 range covering the first three columns of `tab`, optionally
/// limited to `rows` rows.
fn tab_range(tab: &str, rows: Option<usize>) -> String {
    let quoted = tab.replace('\'', "''");
    match rows {
        Some(rows) => format!("'{quoted}'!A1:C{rows}"),
        None => format!("'{quoted}'!A1:C"),
    }
}

#[async_trait]
impl SheetService for DriveSheets {
    async fn create_sheet(&self, name: &str, folder_id: &str) -> Result<String> {
        let url = self
            .base_url
            .join(&format!("drive/v3/files/{}/copy", self.template_id))
            .map_err(|e| Error::sheet(e.to_string()))?;
        let body = CopyRequest {
            name,
            parents: [folder_id],
            mime_type: SPREADSHEET_MIME_TYPE,
        };

        tracing::debug!(name, folder_id, "Copying sheet template");
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::sheet(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::sheet(format!("drive returned {}", response.status())));
        }
        let copied: CopyResponse = response
            .json()
            .await
            .map_err(|e| Error::sheet(e.to_string()))?;
        Ok(copied.id)
    }

    async fn tabs(&self, spreadsheet_id: &str) -> Result<Vec<SheetTab>> {
        let mut url = self.spreadsheet_url(spreadsheet_id, &[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let spreadsheet: SpreadsheetResponse = self.send(self.client.get(url)).await?;
        Ok(spreadsheet
            .sheets
            .into_iter()
            .map(|tab| tab.properties.into())
            .collect())
    }

    async fn header(&self, spreadsheet_id: &str, tab: &str) -> Result<Vec<String>> {
        let url = self.spreadsheet_url(spreadsheet_id, &["values", &tab_range(tab, Some(1))])?;
        let values: ValuesResponse = self.send(self.client.get(url)).await?;
        Ok(values.values.into_iter().next().unwrap_or_default())
    }

    async fn add_tab(&self, spreadsheet_id: &str, title: &str) -> Result<SheetTab> {
        tracing::debug!(spreadsheet_id, title, "Adding sheet tab");
        let added = self
            .batch_update(
                spreadsheet_id,
                json!([{ "addSheet": { "properties": { "title": title } } }]),
            )
            .await?;
        let tab: SheetTab = added
            .replies
            .into_iter()
            .next()
            .map(|reply| reply.add_sheet.properties.into())
            .ok_or_else(|| Error::sheet("addSheet returned no tab"))?;

        self.batch_update(
            spreadsheet_id,
            json!([
                {
                    "repeatCell": {
                        "range": {
                            "sheetId": tab.id,
                            "startRowIndex": 1,
                            "startColumnIndex": 0,
                            "endColumnIndex": 2
                        },
                        "cell": { "userEnteredFormat": { "textFormat": { "fontFamily": "Roboto Mono" } } },
                        "fields": "userEnteredFormat.textFormat.fontFamily"
                    }
                },
                {
                    "repeatCell": {
                        "range": { "sheetId": tab.id, "startRowIndex": 0, "endRowIndex": 1 },
                        "cell": { "userEnteredFormat": { "textFormat": { "bold": true } } },
                        "fields": "userEnteredFormat.textFormat.bold"
                    }
                }
            ]),
        )
        .await?;
        Ok(tab)
    }

    async fn write_rows(&self, spreadsheet_id: &str, tab: &str, rows: &[Vec<String>]) -> Result<()> {
        let range = tab_range(tab, None);
        let mut url = self.spreadsheet_url(spreadsheet_id, &["values", &range])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        tracing::debug!(spreadsheet_id, tab, rows = rows.len(), "Writing sheet rows");
        let _: serde_json::Value = self
            .send(self.client.put(url).json(&json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": rows,
            })))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_sheets_record_calls() -> Result<()> {
        let sheets = InMemorySheets::new();
        let id = sheets.create_sheet("Puzzle", "folder").await?;
        assert_eq!(id, "sheet-1");
        assert_eq!(sheets.created(), vec![("Puzzle".to_string(), "folder".to_string())]);

        sheets.set_failing(true);
        assert!(sheets.create_sheet("Other", "folder").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_in_memory_tabs() -> Result<()> {
        let sheets = InMemorySheets::new();
        assert!(sheets.tabs("sheet-1").await?.is_empty());

        let tab = sheets.add_tab("sheet-1", "Answers").await?;
        assert_eq!(tab.id, 1);
        assert!(sheets.header("sheet-1", "Answers").await?.is_empty());

        let rows = vec![
            vec!["Title".to_string(), "Answer".to_string(), "Google sheet".to_string(), "extra".to_string()],
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
        ];
        sheets.write_rows("sheet-1", "Answers", &rows).await?;
        assert_eq!(sheets.header("sheet-1", "Answers").await?, vec!["Title", "Answer", "Google sheet"]);
        assert_eq!(sheets.rows("sheet-1", "Answers").map(|rows| rows.len()), Some(2));
        assert!(sheets.write_rows("sheet-1", "Missing", &rows).await.is_err());
        Ok(())
    }

    #[test]
    fn test_drive_rejects_bad_base_url() {
        assert!(DriveSheets::new("not a url", "token", DEFAULT_TEMPLATE_ID).is_err());
    }

    #[test]
    fn test_tab_ranges_quote_titles() {
        assert_eq!(tab_range("Intro Feeder Answers", Some(1)), "'Intro Feeder Answers'!A1:C1");
        assert_eq!(tab_range("Bob's Round", None), "'Bob''s Round'!A1:C");
    }

    #[test]
    fn test_spreadsheet_urls_encode_ranges() -> Result<()> {
        let sheets = DriveSheets::new("https://www.googleapis.com/", "token", DEFAULT_TEMPLATE_ID)?
            .with_sheets_base("https://sheets.example.com/")?;
        let url = sheets.spreadsheet_url("abc", &["values", "'A B'!A1:C"])?;
        assert_eq!(url.host_str(), Some("sheets.example.com"));
        assert!(url.path().starts_with("/v4/spreadsheets/abc/values/"));
        assert!(url.path().contains("A%20B"));
        Ok(())
    }
}
