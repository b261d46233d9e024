// ==========================================
// 医疗数据导入系统 - XML 读取器
// ==========================================
// 结构约定:
//   <root>
//     <record attr="v"><field>value</field>...</record>
//     ...
//   </root>
// - 根元素的每个直接子元素是一条记录（行号从 1 开始）
// - 记录的属性与直接子元素文本均视为字段
// - 更深层的嵌套内容忽略
// ==========================================

use crate::domain::import::RowRecord;
use crate::domain::types::FileFormat;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::format_reader::{ByteSource, FormatReader, RecordStream};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufReader;

const RECORD_DEPTH: usize = 2;
const FIELD_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlFormatReader;

impl FormatReader for XmlFormatReader {
    fn format(&self) -> FileFormat {
        FileFormat::Xml
    }

    fn read(&self, source: ByteSource) -> ImportResult<RecordStream> {
        let mut reader = Reader::from_reader(BufReader::new(source));
        reader.config_mut().trim_text(true);

        Ok(Box::new(XmlRecords {
            reader,
            buf: Vec::new(),
            depth: 0,
            line: 0,
            current: None,
            field: None,
            text: String::new(),
            done: false,
        }))
    }
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// 元素属性 → (名, 值)
fn attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>, String> {
    let mut pairs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        pairs.push((key, value.trim().to_string()));
    }
    Ok(pairs)
}

struct XmlRecords {
    reader: Reader<BufReader<ByteSource>>,
    buf: Vec<u8>,
    depth: usize,
    line: usize,
    current: Option<RowRecord>,
    field: Option<String>,
    text: String,
    done: bool,
}

impl XmlRecords {
    fn fail(&mut self, message: String) -> Option<ImportResult<RowRecord>> {
        // 语法错误后解析器无法可靠恢复，终止序列
        self.done = true;
        Some(Err(ImportError::XmlParseError {
            line: self.line.max(1),
            message,
        }))
    }

    fn open_record(&mut self, start: &BytesStart<'_>) -> Result<RowRecord, String> {
        self.line += 1;
        let mut row = RowRecord::new(self.line);
        for (key, value) in attributes(start)? {
            row.values.insert(key, value);
        }
        Ok(row)
    }
}

impl Iterator for XmlRecords {
    type Item = ImportResult<RowRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event.into_owned(),
                Err(e) => return self.fail(e.to_string()),
            };

            match event {
                Event::Start(start) => {
                    self.depth += 1;
                    if self.depth == RECORD_DEPTH {
                        match self.open_record(&start) {
                            Ok(row) => self.current = Some(row),
                            Err(message) => return self.fail(message),
                        }
                    } else if self.depth == FIELD_DEPTH {
                        self.field = Some(local_name(&start));
                        self.text.clear();
                    }
                }
                Event::Empty(start) => {
                    // <record a="1"/> 或 <field/>
                    if self.depth + 1 == RECORD_DEPTH {
                        match self.open_record(&start) {
                            Ok(row) if !row.is_blank() => return Some(Ok(row)),
                            Ok(_) => {}
                            Err(message) => return self.fail(message),
                        }
                    } else if self.depth + 1 == FIELD_DEPTH {
                        if let Some(row) = self.current.as_mut() {
                            row.values.insert(local_name(&start), String::new());
                        }
                    }
                }
                Event::Text(text) => {
                    if self.depth == FIELD_DEPTH {
                        match text.unescape() {
                            Ok(value) => self.text.push_str(&value),
                            Err(e) => return self.fail(e.to_string()),
                        }
                    }
                }
                Event::CData(data) => {
                    if self.depth == FIELD_DEPTH {
                        self.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::End(_) => {
                    if self.depth == FIELD_DEPTH {
                        if let (Some(row), Some(name)) = (self.current.as_mut(), self.field.take()) {
                            row.values.insert(name, self.text.trim().to_string());
                        }
                    }
                    let closing_record = self.depth == RECORD_DEPTH;
                    self.depth = self.depth.saturating_sub(1);
                    if closing_record {
                        if let Some(row) = self.current.take() {
                            if !row.is_blank() {
                                return Some(Ok(row));
                            }
                        }
                    }
                }
                Event::Eof => {
                    self.done = true;
                    return None;
                }
                _ => {}
            }
        }
    }
}
