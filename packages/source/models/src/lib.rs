#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Core data types shared by the snow-cover ingest and conversion crates.
//!
//! An [`IngestDate`] drives every path and URL the pipeline builds. Source
//! adapters produce [`RawArtifact`]s, the conversion orchestrator turns them
//! into [`ConvertedArtifact`]s using the fixed [`GeoReference`] and
//! [`EnviHeader`] metadata of each product.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Datelike as _, NaiveDate};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Date format accepted on the command line and used in log output.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// The calendar day a run ingests and converts.
///
/// Supplied once at run start and never changed afterwards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IngestDate(NaiveDate);

impl IngestDate {
    /// Wraps a [`NaiveDate`].
    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Builds a date from its components, returning `None` for invalid days.
    #[must_use]
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// Today's date in the local timezone.
    #[must_use]
    pub fn today() -> Self {
        Self(chrono::Local::now().date_naive())
    }

    /// The underlying [`NaiveDate`].
    #[must_use]
    pub const fn date(self) -> NaiveDate {
        self.0
    }

    /// Four-digit year, e.g. `"2025"`.
    #[must_use]
    pub fn year_segment(self) -> String {
        format!("{:04}", self.0.year())
    }

    /// Zero-padded month, e.g. `"05"`.
    #[must_use]
    pub fn month_segment(self) -> String {
        format!("{:02}", self.0.month())
    }

    /// Zero-padded day, e.g. `"12"`.
    #[must_use]
    pub fn day_segment(self) -> String {
        format!("{:02}", self.0.day())
    }

    /// Zero-padded month followed by the English month abbreviation, e.g.
    /// `"05_May"`. This is how the SNODAS archive groups its files.
    #[must_use]
    pub fn month_name_segment(self) -> String {
        self.0.format("%m_%b").to_string()
    }

    /// `YYYYMMDD`, e.g. `"20250512"`.
    #[must_use]
    pub fn compact(self) -> String {
        self.0.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for IngestDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl FromStr for IngestDate {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).map(Self)
    }
}

impl From<NaiveDate> for IngestDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

/// A remote snow-cover archive.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SourceId {
    /// MODIS Normalized Difference Snow Index tiles (HDF4-EOS).
    Ndsi,
    /// NOAA Snow Data Assimilation System daily archive.
    Snodas,
}

impl SourceId {
    /// Every source, in the order a full run processes them.
    pub const ALL: &[Self] = &[Self::Snodas, Self::Ndsi];

    /// How the month directory is named for this source at `stage`.
    ///
    /// Raw SNODAS files keep the archive's `MM_Mon` grouping; everything
    /// else uses the zero-padded month number.
    #[must_use]
    pub const fn month_style(self, stage: Stage) -> MonthStyle {
        match (self, stage) {
            (Self::Snodas, Stage::Raw) => MonthStyle::NumberedName,
            _ => MonthStyle::Numeric,
        }
    }
}

/// Pipeline stage a directory belongs to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    /// Downloaded or extracted files.
    Raw,
    /// GeoTIFF output.
    Converted,
}

/// Naming of the month component in a date-partitioned path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonthStyle {
    /// `05`
    Numeric,
    /// `05_May`
    NumberedName,
}

impl MonthStyle {
    /// Formats the month directory name for `date`.
    #[must_use]
    pub fn segment(self, date: IngestDate) -> String {
        match self {
            Self::Numeric => date.month_segment(),
            Self::NumberedName => date.month_name_segment(),
        }
    }
}

/// What kind of file a [`RawArtifact`] is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ArtifactFormat {
    /// A `.tar` bundle of several products.
    Archive,
    /// A gzip-compressed archive member.
    CompressedMember,
    /// Headerless raster bytes (`.dat`).
    RawBinary,
    /// HDF4 tagged file (`.hdf`).
    TagFormat,
    /// Plain-text sidecar (`.txt`, `.hdr`).
    Metadata,
}

impl ArtifactFormat {
    /// Classifies a file by extension. Returns `None` for unknown types.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "tar" => Some(Self::Archive),
            "gz" => Some(Self::CompressedMember),
            "dat" => Some(Self::RawBinary),
            "hdf" => Some(Self::TagFormat),
            "txt" | "hdr" => Some(Self::Metadata),
            _ => None,
        }
    }
}

/// A downloaded or extracted file.
///
/// Never mutated after creation. An artifact may be superseded, e.g. an
/// archive is deleted once its members have been extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArtifact {
    /// Absolute or data-dir relative location on disk.
    pub path: PathBuf,
    /// Archive the file came from.
    pub source: SourceId,
    /// Day the file belongs to.
    pub date: IngestDate,
    /// File kind.
    pub format: ArtifactFormat,
}

impl RawArtifact {
    /// Creates an artifact with an explicit format.
    #[must_use]
    pub const fn new(
        path: PathBuf,
        source: SourceId,
        date: IngestDate,
        format: ArtifactFormat,
    ) -> Self {
        Self {
            path,
            source,
            date,
            format,
        }
    }

    /// Creates an artifact, classifying the format from the file extension.
    #[must_use]
    pub fn from_path(path: PathBuf, source: SourceId, date: IngestDate) -> Option<Self> {
        let format = ArtifactFormat::from_path(&path)?;
        Some(Self::new(path, source, date, format))
    }

    /// File name component of the path.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// A GeoTIFF produced from one [`RawArtifact`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedArtifact {
    /// Location of the GeoTIFF.
    pub path: PathBuf,
    /// Source the raster came from.
    pub source: SourceId,
    /// Day the raster belongs to.
    pub date: IngestDate,
    /// Raw file the GeoTIFF was produced from.
    pub input: PathBuf,
    /// `true` when the GeoTIFF already existed and was left untouched.
    pub reused: bool,
}

/// Products bundled in the daily SNODAS archive, keyed by the code that
/// appears in each member's file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SnodasProduct {
    /// Modeled snow water equivalent.
    SnowWaterEquivalent,
    /// Modeled snow depth.
    SnowDepth,
    /// Modeled snowpack average temperature.
    SnowpackAverageTemperature,
    /// Modeled blowing snow sublimation.
    BlowingSnowSublimation,
    /// Modeled snow melt runoff at the base of the snowpack.
    SnowMeltRunoff,
    /// Modeled sublimation from the snowpack.
    SnowpackSublimation,
    /// Non-snow (liquid) precipitation.
    LiquidPrecipitation,
    /// Snow (solid) precipitation.
    SolidPrecipitation,
}

impl SnodasProduct {
    /// Every product in the archive.
    pub const ALL: &[Self] = &[
        Self::SnowWaterEquivalent,
        Self::SnowDepth,
        Self::SnowpackAverageTemperature,
        Self::BlowingSnowSublimation,
        Self::SnowMeltRunoff,
        Self::SnowpackSublimation,
        Self::LiquidPrecipitation,
        Self::SolidPrecipitation,
    ];

    /// Code embedded in the archive member names for this product.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::SnowWaterEquivalent => "11034",
            Self::SnowDepth => "11036",
            Self::SnowpackAverageTemperature => "11038",
            Self::BlowingSnowSublimation => "11039",
            Self::SnowMeltRunoff => "11044",
            Self::SnowpackSublimation => "11050",
            Self::LiquidPrecipitation => "01025SlL00",
            Self::SolidPrecipitation => "01025SlL01",
        }
    }

    /// Looks a product up by its member-name code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.code() == code)
    }
}

/// Keyword substrings selecting which archive members to keep.
///
/// A member is kept when its name contains any keyword. An empty filter
/// keeps nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionFilter {
    keywords: Vec<String>,
}

impl ExtractionFilter {
    /// Builds a filter from raw keywords.
    #[must_use]
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a filter keeping the given products.
    #[must_use]
    pub fn from_products(products: &[SnodasProduct]) -> Self {
        Self::new(products.iter().map(|p| p.code()))
    }

    /// Returns `true` if `member_name` contains any keyword.
    #[must_use]
    pub fn matches(&self, member_name: &str) -> bool {
        self.keywords.iter().any(|k| member_name.contains(k.as_str()))
    }

    /// The configured keywords.
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

/// Corner coordinates of a raster, kept as the exact decimal literals the
/// translation tool receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    /// Upper-left longitude.
    pub ulx: &'static str,
    /// Upper-left latitude.
    pub uly: &'static str,
    /// Lower-right longitude.
    pub lrx: &'static str,
    /// Lower-right latitude.
    pub lry: &'static str,
}

/// Fixed georeferencing needed to tag a headerless raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoReference {
    /// PROJ string for the output coordinate system.
    pub srs: &'static str,
    /// Sentinel value for missing pixels.
    pub nodata: &'static str,
    /// Explicit corners, when the input carries none.
    pub bounds: Option<Bounds>,
}

/// Georeferencing of the unmasked SNODAS grid (WGS84, continental extent).
pub const SNODAS_GEOREFERENCE: GeoReference = GeoReference {
    srs: "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs",
    nodata: "-9999",
    bounds: Some(Bounds {
        ulx: "-130.51708333333333",
        uly: "58.23291666666667",
        lrx: "-62.25041666666667",
        lry: "24.09958333333333",
    }),
};

/// An ENVI sidecar header describing a headerless binary raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnviHeader {
    /// Columns.
    pub samples: u32,
    /// Rows.
    pub lines: u32,
    /// Band count.
    pub bands: u32,
    /// Bytes to skip before pixel data.
    pub header_offset: u32,
    /// ENVI file type.
    pub file_type: &'static str,
    /// ENVI data type code (2 = 16-bit signed integer).
    pub data_type: u8,
    /// Band interleave.
    pub interleave: &'static str,
    /// 0 = little endian, 1 = big endian.
    pub byte_order: u8,
}

/// Header for one unmasked SNODAS grid: 8192 x 4096 big-endian `i16`.
pub const SNODAS_ENVI_HEADER: EnviHeader = EnviHeader {
    samples: 8192,
    lines: 4096,
    bands: 1,
    header_offset: 0,
    file_type: "ENVI Standard",
    data_type: 2,
    interleave: "bsq",
    byte_order: 1,
};

impl fmt::Display for EnviHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ENVI\n\
             samples = {}\n\
             lines = {}\n\
             bands = {}\n\
             header offset = {}\n\
             file type = {}\n\
             data type = {}\n\
             interleave = {}\n\
             byte order = {}",
            self.samples,
            self.lines,
            self.bands,
            self.header_offset,
            self.file_type,
            self.data_type,
            self.interleave,
            self.byte_order,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn may_12() -> IngestDate {
        IngestDate::from_ymd(2025, 5, 12).unwrap()
    }

    #[test]
    fn date_segments_are_zero_padded() {
        let date = IngestDate::from_ymd(2024, 1, 3).unwrap();
        assert_eq!(date.year_segment(), "2024");
        assert_eq!(date.month_segment(), "01");
        assert_eq!(date.day_segment(), "03");
        assert_eq!(date.month_name_segment(), "01_Jan");
        assert_eq!(date.compact(), "20240103");
    }

    #[test]
    fn date_parses_and_displays_iso() {
        let date: IngestDate = "2025-05-12".parse().unwrap();
        assert_eq!(date, may_12());
        assert_eq!(date.to_string(), "2025-05-12");
        assert!("2025-13-01".parse::<IngestDate>().is_err());
        assert!("12/05/2025".parse::<IngestDate>().is_err());
    }

    #[test]
    fn month_style_depends_on_source_and_stage() {
        assert_eq!(
            SourceId::Snodas.month_style(Stage::Raw).segment(may_12()),
            "05_May"
        );
        assert_eq!(
            SourceId::Snodas.month_style(Stage::Converted).segment(may_12()),
            "05"
        );
        assert_eq!(SourceId::Ndsi.month_style(Stage::Raw).segment(may_12()), "05");
    }

    #[test]
    fn source_id_round_trips_through_strings() {
        assert_eq!(SourceId::Ndsi.to_string(), "ndsi");
        assert_eq!("SNODAS".parse::<SourceId>().unwrap(), SourceId::Snodas);
        assert!("modis".parse::<SourceId>().is_err());
    }

    #[test]
    fn artifact_format_from_extension() {
        let cases = [
            ("SNODAS_unmasked_20250512.tar", Some(ArtifactFormat::Archive)),
            ("zz_ssmv11034tS.dat.gz", Some(ArtifactFormat::CompressedMember)),
            ("zz_ssmv11034tS.dat", Some(ArtifactFormat::RawBinary)),
            ("MOD10A1.A2025132.h09v04.hdf", Some(ArtifactFormat::TagFormat)),
            ("zz_ssmv11034tS.txt", Some(ArtifactFormat::Metadata)),
            ("zz_ssmv11034tS.hdr", Some(ArtifactFormat::Metadata)),
            ("notes.md", None),
            ("no_extension", None),
        ];
        for (name, expected) in cases {
            assert_eq!(ArtifactFormat::from_path(Path::new(name)), expected, "{name}");
        }
    }

    #[test]
    fn filter_keeps_only_matching_members() {
        let filter = ExtractionFilter::new(["11034"]);
        assert!(filter.matches("snow_depth_11034.dat.gz"));
        assert!(!filter.matches("snow_depth_11036.dat.gz"));
        assert!(!filter.matches("other.txt"));
        assert!(!ExtractionFilter::default().matches("snow_depth_11034.dat.gz"));
    }

    #[test]
    fn product_table_resolves_codes() {
        assert_eq!(
            SnodasProduct::from_code("11036"),
            Some(SnodasProduct::SnowDepth)
        );
        assert_eq!(SnodasProduct::from_code("99999"), None);
        let filter = ExtractionFilter::from_products(&[SnodasProduct::SnowWaterEquivalent]);
        assert_eq!(filter.keywords(), ["11034".to_string()]);
    }

    #[test]
    fn snodas_header_renders_fixed_text() {
        assert_eq!(
            SNODAS_ENVI_HEADER.to_string(),
            "ENVI\nsamples = 8192\nlines = 4096\nbands = 1\nheader offset = 0\n\
             file type = ENVI Standard\ndata type = 2\ninterleave = bsq\nbyte order = 1"
        );
    }
}
