/// per-exchange decode state: connection persistence and the request method
/// quirks that change how the response body is framed.
pub(crate) struct Context {
    ctype: ConnectionType,
    head_method: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionType {
    KeepAlive,
    Close,
    // forced close after a local failure. a later response header must not
    // flip it back to keep-alive.
    CloseForce,
}

impl Context {
    pub(crate) fn new() -> Self {
        Self {
            ctype: ConnectionType::KeepAlive,
            head_method: false,
        }
    }

    pub(crate) fn set_head_method(&mut self) {
        self.head_method = true;
    }

    pub(crate) fn is_head_method(&self) -> bool {
        self.head_method
    }

    pub(crate) fn set_close(&mut self) {
        self.ctype = ConnectionType::CloseForce;
    }

    pub(crate) fn is_connection_closed(&self) -> bool {
        matches!(
            self.ctype,
            ConnectionType::Close | ConnectionType::CloseForce
        )
    }

    pub(crate) fn set_ctype_from_header(&mut self, value: &http::HeaderValue) {
        if self.ctype == ConnectionType::CloseForce {
            return;
        }
        let Ok(value) = value.to_str() else { return };
        for token in value.split(',') {
            let token = token.trim();
            if token.eq_ignore_ascii_case("keep-alive") {
                self.ctype = ConnectionType::KeepAlive;
            } else if token.eq_ignore_ascii_case("close") {
                self.ctype = ConnectionType::Close;
            }
        }
    }

    pub(crate) fn set_version(&mut self, version: http::Version) {
        // http/1.0 defaults to close unless keep-alive is negotiated.
        if version == http::Version::HTTP_10 && self.ctype == ConnectionType::KeepAlive {
            self.ctype = ConnectionType::Close;
        }
    }
}
