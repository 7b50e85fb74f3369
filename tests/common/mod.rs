#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fias_xml_csv::{SchemaResolver, SchemaTable};

/// Test fixture paths
pub struct TestFixtures {
    pub fixtures_dir: PathBuf,
}

impl TestFixtures {
    pub fn new() -> Self {
        let fixtures_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures");

        Self { fixtures_dir }
    }

    pub fn xml_dir(&self) -> PathBuf {
        self.fixtures_dir.join("xml")
    }

    pub fn xsd_dir(&self) -> PathBuf {
        self.fixtures_dir.join("xsd")
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.fixtures_dir.join("configs")
    }

    pub fn houses_xml(&self) -> PathBuf {
        self.xml_dir().join("AS_HOUSES_20240101_0001.XML")
    }

    pub fn steads_xml(&self) -> PathBuf {
        self.xml_dir().join("77").join("AS_STEADS_20240101_0002.XML")
    }

    pub fn object_levels_xml(&self) -> PathBuf {
        self.xml_dir().join("AS_OBJECT_LEVELS_20240101_0003.XML")
    }

    /// Resolve the fixture schema directory
    pub async fn schema_table(&self) -> Arc<SchemaTable> {
        SchemaResolver::new()
            .resolve(&self.xsd_dir())
            .await
            .unwrap()
            .into_shared()
    }
}

pub const HOUSES_CSV: &str = "\
ID;OBJECTID;OBJECTGUID;HOUSENUM;HOUSETYPE;UPDATEDATE;ISACTUAL
1001;5001;0a1b2c3d-0000-4000-8000-000000000001;5;2;2024-01-01;1
1002;5002;0a1b2c3d-0000-4000-8000-000000000002;;;2023-12-31;0
1003;5003;0a1b2c3d-0000-4000-8000-000000000003;\"12;1\";;2024-01-01;1
";

pub const STEADS_CSV: &str = "\
ID;NUMBER;ISACTIVE;CADNUM;REGIONCODE
1;14;true;77:01:0001001:1;77
2;15;;;77
";

pub const OBJECT_LEVELS_CSV: &str = "\
LEVEL;NAME;STARTDATE;ISACTIVE
1;Субъект РФ;1900-01-01;true
2;Административный район;1900-01-01;true
";

/// CSV text as written with the default format: BOM and CRLF rows
pub fn loader_bytes(csv: &str) -> String {
    format!("\u{feff}{}", csv.replace('\n', "\r\n"))
}

/// Write a file, creating parent directories
pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub fn read_file(path: &Path) -> String {
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e))
}
