/// SDP 媒体方向改写（保持 / 恢复通话的重协商）
///
/// 只改写 `a=sendrecv|sendonly|recvonly|inactive` 属性行，其余内容和换行符原样保留
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaDirection::SendRecv => "sendrecv",
            MediaDirection::SendOnly => "sendonly",
            MediaDirection::RecvOnly => "recvonly",
            MediaDirection::Inactive => "inactive",
        }
    }

    fn from_attribute(line: &str) -> Option<Self> {
        match line.strip_prefix("a=")? {
            "sendrecv" => Some(MediaDirection::SendRecv),
            "sendonly" => Some(MediaDirection::SendOnly),
            "recvonly" => Some(MediaDirection::RecvOnly),
            "inactive" => Some(MediaDirection::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 对本端 SDP 施加的方向变更
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionModifier {
    /// 保持：`sendrecv → sendonly`，`recvonly → inactive`
    Hold,
    /// 恢复：所有方向改为 `sendrecv`
    Resume,
}

impl DirectionModifier {
    fn map(&self, current: MediaDirection) -> MediaDirection {
        match (self, current) {
            (DirectionModifier::Resume, _) => MediaDirection::SendRecv,
            (DirectionModifier::Hold, MediaDirection::SendRecv) => MediaDirection::SendOnly,
            (DirectionModifier::Hold, MediaDirection::RecvOnly) => MediaDirection::Inactive,
            (DirectionModifier::Hold, other) => other,
        }
    }

    /// 改写 `sdp` 中所有方向属性；重复施加结果不变
    pub fn apply(&self, sdp: &str) -> String {
        let mut out = String::with_capacity(sdp.len());
        for line in sdp.split_inclusive('\n') {
            let content = line.trim_end_matches(['\r', '\n']);
            let ending = &line[content.len()..];
            match MediaDirection::from_attribute(content) {
                Some(direction) => {
                    out.push_str("a=");
                    out.push_str(self.map(direction).as_str());
                    out.push_str(ending);
                }
                None => out.push_str(line),
            }
        }
        out
    }

    /// `sendrecv` 经过改写后的方向
    pub fn target(&self) -> MediaDirection {
        self.map(MediaDirection::SendRecv)
    }
}

/// 按顺序列出所有媒体段的方向
pub fn directions(sdp: &str) -> Vec<MediaDirection> {
    sdp.lines()
        .filter_map(|line| MediaDirection::from_attribute(line.trim_end()))
        .collect()
}
