use anyhow::bail;
use serde::de::DeserializeOwned;

use crate::AnyResult;

pub(crate) fn parse<T: DeserializeOwned>(extension: String, raw: &[u8]) -> AnyResult<T> {
    match ParserType::from(extension.as_str()) {
        ParserType::Json(parser) => parser.parse(raw),
        ParserType::Toml(parser) => parser.parse(raw),
        ParserType::Unsupported => {
            bail!("no parser available for config format {:?}", extension)
        }
    }
}

enum ParserType {
    Json(JsonParser),
    Toml(TomlParser),
    Unsupported,
}

impl From<&str> for ParserType {
    fn from(extension: &str) -> ParserType {
        match extension {
            "json" => ParserType::Json(JsonParser),
            "toml" => ParserType::Toml(TomlParser),
            _ => ParserType::Unsupported,
        }
    }
}

trait Parser {
    fn parse<T: DeserializeOwned>(&self, raw: &[u8]) -> AnyResult<T>;
}

struct JsonParser;

impl Parser for JsonParser {
    fn parse<T: DeserializeOwned>(&self, raw: &[u8]) -> AnyResult<T> {
        Ok(serde_json::from_slice(raw)?)
    }
}

struct TomlParser;

impl Parser for TomlParser {
    fn parse<T: DeserializeOwned>(&self, raw: &[u8]) -> AnyResult<T> {
        let content = std::str::from_utf8(raw)?;
        Ok(toml::from_str(content)?)
    }
}
