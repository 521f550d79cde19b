//! HTTP listing extractor.
//!
//! Fetches a listing page with `reqwest` and turns every element matching the
//! configured item selector into a [`Record`], one field per configured field
//! selector. Field values are the element's normalised text, or an attribute
//! when `attr` is set. Relative links are resolved against `base_url`.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use car_harvest_core::contract::{ExtractionError, Extractor, Record};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!("car-harvest/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One output column and where to find it inside a listing element.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FieldSelector {
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub attr: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ExtractorConfig {
    /// Selector matching one listing element.
    pub item: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub fields: Vec<FieldSelector>,
}

struct CompiledField {
    name: String,
    selector: Selector,
    attr: Option<String>,
}

/// Selector-driven parser for a listing page.
pub struct ListingParser {
    item: Selector,
    fields: Vec<CompiledField>,
    base: Option<Url>,
    whitespace: Regex,
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("invalid CSS selector '{selector}': {e}"))
}

impl ListingParser {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        if config.fields.is_empty() {
            return Err(anyhow!("extractor needs at least one field"));
        }
        let fields = config
            .fields
            .iter()
            .map(|f| {
                Ok(CompiledField {
                    name: f.name.clone(),
                    selector: compile(&f.selector)
                        .with_context(|| format!("field '{}'", f.name))?,
                    attr: f.attr.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let base = config
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .context("invalid extractor base_url")?;

        Ok(Self {
            item: compile(&config.item).context("item selector")?,
            fields,
            base,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Records in document order. Elements where no field matched are dropped.
    pub fn parse(&self, html: &str) -> Vec<Record> {
        let document = Html::parse_document(html);
        document
            .select(&self.item)
            .filter_map(|item| self.parse_item(item))
            .collect()
    }

    fn parse_item(&self, item: ElementRef<'_>) -> Option<Record> {
        let mut record = Record::new();
        let mut found = false;
        for field in &self.fields {
            let value = item
                .select(&field.selector)
                .next()
                .and_then(|el| self.field_value(el, field.attr.as_deref()));
            found |= value.is_some();
            record.insert(field.name.clone(), value.map_or(Value::Null, Value::String));
        }
        found.then_some(record)
    }

    fn field_value(&self, el: ElementRef<'_>, attr: Option<&str>) -> Option<String> {
        let raw = match attr {
            Some(attr) => {
                let value = el.value().attr(attr)?;
                if matches!(attr, "href" | "src") {
                    self.absolute(value)
                } else {
                    value.to_string()
                }
            }
            None => el.text().collect::<String>(),
        };
        let value = self.whitespace.replace_all(raw.trim(), " ").into_owned();
        (!value.is_empty()).then_some(value)
    }

    fn absolute(&self, link: &str) -> String {
        match &self.base {
            Some(base) => base
                .join(link)
                .map(String::from)
                .unwrap_or_else(|_| link.to_string()),
            None => link.to_string(),
        }
    }
}

pub struct HttpExtractor {
    client: reqwest::Client,
    parser: ListingParser,
}

impl HttpExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            parser: ListingParser::new(config)?,
        })
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn fetch(&self, page_url: &str) -> Result<Vec<Record>, ExtractionError> {
        let request_error = |e: reqwest::Error| ExtractionError::Request {
            url: page_url.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .get(page_url)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Status {
                url: page_url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(request_error)?;

        let records = self.parser.parse(&body);
        debug!(url = page_url, records = records.len(), "Parsed listing page");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="listing">
            <a class="title" href="/ar/automotive/classic-cars/123">  Chevrolet
                Impala 1967 </a>
            <span class="price">4,500 KWD</span>
            <time datetime="2024-01-02T08:15:00Z">Yesterday</time>
          </div>
          <div class="listing">
            <a class="title" href="https://other.example/456">Ford Mustang</a>
            <time datetime="2024-01-01T20:00:00Z">2 days ago</time>
          </div>
          <div class="listing"></div>
        </body></html>
    "#;

    fn config() -> ExtractorConfig {
        ExtractorConfig {
            item: "div.listing".into(),
            base_url: Some("https://www.q84sale.com".into()),
            fields: vec![
                FieldSelector {
                    name: "title".into(),
                    selector: "a.title".into(),
                    attr: None,
                },
                FieldSelector {
                    name: "link".into(),
                    selector: "a.title".into(),
                    attr: Some("href".into()),
                },
                FieldSelector {
                    name: "price".into(),
                    selector: ".price".into(),
                    attr: None,
                },
                FieldSelector {
                    name: "date_published".into(),
                    selector: "time".into(),
                    attr: Some("datetime".into()),
                },
            ],
        }
    }

    #[test]
    fn extracts_one_record_per_listing() {
        let records = ListingParser::new(&config()).unwrap().parse(PAGE);

        assert_eq!(records.len(), 2, "empty listing element is dropped");
        let first = &records[0];
        assert_eq!(first.get("title").unwrap(), "Chevrolet Impala 1967");
        assert_eq!(
            first.get("link").unwrap(),
            "https://www.q84sale.com/ar/automotive/classic-cars/123"
        );
        assert_eq!(first.get("price").unwrap(), "4,500 KWD");
        assert_eq!(first.get("date_published").unwrap(), "2024-01-02T08:15:00Z");

        let second = &records[1];
        assert_eq!(second.get("link").unwrap(), "https://other.example/456");
        assert_eq!(second.get("price").unwrap(), &Value::Null);
    }

    #[test]
    fn field_order_follows_configuration() {
        let records = ListingParser::new(&config()).unwrap().parse(PAGE);
        let keys: Vec<&str> = records[0].fields().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["title", "link", "price", "date_published"]);
    }

    #[test]
    fn rejects_invalid_selectors() {
        let mut bad = config();
        bad.fields[1].selector = "a[".into();
        let err = ListingParser::new(&bad).err().unwrap();
        assert!(format!("{err:#}").contains("link"), "{err:#}");
    }

    #[test]
    fn rejects_empty_field_list() {
        let mut bad = config();
        bad.fields.clear();
        assert!(ListingParser::new(&bad).is_err());
    }
}
