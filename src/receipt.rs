// Receipt sequencing: submission result -> ordered printer primitives
//
// Pure and deterministic. Everything time- or device-dependent comes in
// through `IntakeContext`.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::intake::MemberRecord;
use crate::registration::{Entrance, GroupSubmissionResult};

const EVENT_TITLE: &str = "蒼翔祭";
const GROUP_TICKET_TITLE: &str = "入場チケット";
const GUEST_TICKET_TITLE: &str = "蒼翔祭入場者ID";
const NOTICE_LEAD: &str = "以下のQRコードは、\n入場時・再入場時・大抽選会\nの";
const NOTICE_EMPHASIS: &str = "全てにおいて必要となります。\n";
const NOTICE_TAIL: &str = "管理には十分ご注意ください。\n";

/// QR module size used on both ticket kinds
const QR_MODULE_SIZE: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Font {
    A,
    B,
    C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Language {
    Japanese,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCorrection {
    L,
    M,
    Q,
    H,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Symbology {
    QrModel2 {
        module_size: u8,
        level: ErrorCorrection,
    },
}

/// 1-bit raster image, row-major, most significant bit first, 1 = black
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub data: Bytes,
}

impl Bitmap {
    pub fn bytes_per_row(&self) -> u32 {
        self.width.div_ceil(8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum PrintPrimitive {
    SetAlignment(Alignment),
    SetFont(Font),
    SetLanguage(Language),
    SetSmoothing(bool),
    SetTextStyle { emphasis: bool, underline: bool },
    DrawImage(Bitmap),
    SetTextSize { width: u8, height: u8 },
    EmitText(String),
    EmitSymbol { payload: String, symbology: Symbology },
    FeedLines(u8),
    Cut,
}

/// Everything the tickets need besides the registration result
#[derive(Debug, Clone)]
pub struct IntakeContext {
    pub entrance: Entrance,
    pub issued_at: DateTime<Utc>,
    pub representative: MemberRecord,
    pub member_count: usize,
    pub logo: Option<Bitmap>,
}

/// ISO-8601 with milliseconds and a `Z` suffix
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build the full print job: one group ticket, then one guest ticket per
/// guest in submission order.
pub fn build_sequence(result: &GroupSubmissionResult, context: &IntakeContext) -> Vec<PrintPrimitive> {
    let mut sequence = Vec::with_capacity(40 + result.guests.len() * 12);
    group_ticket(&mut sequence, &result.group_id, context);
    for guest in &result.guests {
        guest_ticket(&mut sequence, &guest.guest_id);
    }
    sequence
}

fn qr(payload: &str) -> PrintPrimitive {
    PrintPrimitive::EmitSymbol {
        payload: payload.to_string(),
        symbology: Symbology::QrModel2 {
            module_size: QR_MODULE_SIZE,
            level: ErrorCorrection::M,
        },
    }
}

fn text(s: impl Into<String>) -> PrintPrimitive {
    PrintPrimitive::EmitText(s.into())
}

fn size(width: u8, height: u8) -> PrintPrimitive {
    PrintPrimitive::SetTextSize { width, height }
}

fn ticket_header(out: &mut Vec<PrintPrimitive>) {
    out.push(PrintPrimitive::SetAlignment(Alignment::Center));
    out.push(PrintPrimitive::SetFont(Font::C));
    out.push(PrintPrimitive::SetLanguage(Language::Japanese));
}

fn group_ticket(out: &mut Vec<PrintPrimitive>, group_id: &str, context: &IntakeContext) {
    use PrintPrimitive::*;

    ticket_header(out);
    if let Some(logo) = &context.logo {
        out.push(DrawImage(logo.clone()));
    }
    out.push(SetSmoothing(true));
    out.push(FeedLines(1));
    out.push(size(4, 4));
    out.push(text(format!("{}\n", EVENT_TITLE)));
    out.push(SetSmoothing(false));
    out.push(FeedLines(1));
    out.push(size(2, 2));
    out.push(text(format!("{}\n", GROUP_TICKET_TITLE)));
    out.push(size(1, 1));
    out.push(FeedLines(1));

    out.push(text(NOTICE_LEAD));
    out.push(SetTextStyle {
        emphasis: true,
        underline: true,
    });
    out.push(text(NOTICE_EMPHASIS));
    out.push(SetTextStyle {
        emphasis: false,
        underline: false,
    });
    out.push(text(NOTICE_TAIL));
    out.push(FeedLines(4));

    out.push(qr(group_id));
    out.push(FeedLines(4));

    let rep = &context.representative;
    let details = [
        format!("グループID:{}\n", group_id),
        format!("発行場所:{}\n", context.entrance.name()),
        format!("発行時刻:{}\n", format_timestamp(&context.issued_at)),
        format!(
            "年齢: {}, 性別: {}, 人数: {}\n",
            rep.age_range.label(),
            rep.gender.label(),
            context.member_count
        ),
    ];
    out.push(SetAlignment(Alignment::Left));
    for line in details {
        out.push(text(line));
        out.push(FeedLines(2));
    }
    out.push(Cut);
}

fn guest_ticket(out: &mut Vec<PrintPrimitive>, guest_id: &str) {
    use PrintPrimitive::*;

    ticket_header(out);
    out.push(SetSmoothing(true));
    out.push(FeedLines(1));
    out.push(size(2, 2));
    out.push(text(format!("{}\n", GUEST_TICKET_TITLE)));
    out.push(FeedLines(2));
    out.push(qr(guest_id));
    out.push(size(1, 1));
    out.push(text(format!("{}\n", guest_id)));
    out.push(FeedLines(3));
    out.push(Cut);
}
