use crate::config::SubtypeMap;
use common::ConnectionParams;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// RFC 3986 unreserved 之外的字符全部转义
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// 转义URL userinfo中的凭据（如密码中的 `@`）
pub fn escape_credential(value: &str) -> String {
    utf8_percent_encode(value, USERINFO).to_string()
}

/// 模板替换型厂商
#[derive(Debug, Clone)]
pub struct UrlTemplate {
    template: String,
    subtype: Option<SubtypeMap>,
}

impl UrlTemplate {
    pub fn new(template: String, subtype: Option<SubtypeMap>) -> Self {
        Self { template, subtype }
    }

    /// 把连接参数代入模板
    ///
    /// 厂商配置了码流映射时，`"0"` 选主码流、其余选子码流；
    /// 没有映射时原样代入请求里的值。
    pub fn render(&self, params: &ConnectionParams) -> String {
        let subtype = match &self.subtype {
            Some(map) if params.subtype == "0" => map.main.as_str(),
            Some(map) => map.sub.as_str(),
            None => params.subtype.as_str(),
        };

        self.template
            .replace("{ip}", &params.ip)
            .replace("{url}", &params.ip)
            .replace("{account}", &escape_credential(&params.account))
            .replace("{password}", &escape_credential(&params.password))
            .replace("{ch}", &params.channel)
            .replace("{subtype}", subtype)
    }
}

/// 发现得到的地址没有 userinfo 时补上凭据
pub fn with_credentials(uri: &str, account: &str, password: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    if rest[..authority_end].contains('@') {
        return uri.to_string();
    }
    format!(
        "{}://{}:{}@{}",
        scheme,
        escape_credential(account),
        escape_credential(password),
        rest
    )
}

/// 日志输出用：隐藏地址中的密码
pub fn redact(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    match authority.rsplit_once('@') {
        Some((userinfo, host)) => {
            let user = userinfo.split(':').next().unwrap_or_default();
            format!("{}://{}:***@{}{}", scheme, user, host, &rest[authority_end..])
        }
        None => uri.to_string(),
    }
}
