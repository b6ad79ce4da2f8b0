use http::header::{AUTHORIZATION, COOKIE, LOCATION, PROXY_AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderMap, StatusCode};
use std::str::FromStr;

/// How far the built-in transport follows redirects on its own.
///
/// Whatever the policy decides, a redirect it wants to follow is first
/// proposed to whoever reads the [`DataTask`](crate::DataTask) and can still be
/// stopped there.
///
/// - `limited` follows up to a maximum number of hops (default 10).
/// - `none` never follows.
/// - `custom` decides per attempt.
#[derive(Clone, Debug)]
pub enum Policy {
  /// Decide with a function.
  Custom(fn(Attempt) -> Action),
  /// Follow up to this many hops.
  Limit(usize),
  /// Never follow.
  None,
}
/// The next hop and the chain of uris already visited.
#[derive(Clone, Debug, PartialEq)]
pub struct Attempt<'a> {
  status: StatusCode,
  next: &'a http::Uri,
  previous: &'a [http::Uri],
}
/// What to do with a redirect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
  /// Follow
  Follow,
  /// Stop, delivering the 3xx response as the final response.
  Stop,
}

impl Policy {
  /// Create a `Policy` with a maximum number of redirects.
  pub fn limited(max: usize) -> Self {
    Policy::Limit(max)
  }
  /// Create a `Policy` that does not follow any redirect.
  pub fn none() -> Self {
    Policy::None
  }
  /// Create a custom `Policy` using the passed function.
  ///
  /// ```rust
  /// # use eavesdrop::redirect;
  /// let custom = redirect::Policy::custom(|attempt| {
  ///     if attempt.previous().len() > 5 || attempt.url().host() == Some("example.domain") {
  ///         attempt.stop()
  ///     } else {
  ///         attempt.follow()
  ///     }
  /// });
  /// # drop(custom);
  /// ```
  pub fn custom(policy: fn(Attempt) -> Action) -> Self {
    Policy::Custom(policy)
  }
  /// Apply the policy to an attempt.
  pub fn redirect(&self, attempt: Attempt) -> Action {
    match self {
      Policy::Custom(ref custom) => custom(attempt),
      Policy::Limit(max) => {
        if attempt.previous.len() > *max {
          attempt.stop()
        } else {
          attempt.follow()
        }
      }
      Policy::None => attempt.stop(),
    }
  }

  pub(crate) fn check(
    &self,
    status: StatusCode,
    next: &http::Uri,
    previous: &[http::Uri],
  ) -> Action {
    self.redirect(Attempt {
      status,
      next,
      previous,
    })
  }
}

impl Default for Policy {
  fn default() -> Policy {
    Policy::limited(10)
  }
}

impl<'a> Attempt<'a> {
  /// Get the type of redirect.
  pub fn status(&self) -> StatusCode {
    self.status
  }
  /// Get the next URL to redirect to.
  pub fn url(&self) -> &http::Uri {
    self.next
  }
  /// Get the list of previous URLs that have already been requested in this chain.
  pub fn previous(&self) -> &[http::Uri] {
    self.previous
  }
  /// Follow the next URL.
  pub fn follow(self) -> Action {
    Action::Follow
  }
  /// Do not follow the next URL.
  pub fn stop(self) -> Action {
    Action::Stop
  }
}

/// Whether the status code is one the transport treats as a redirect.
pub(crate) fn is_redirect(status: StatusCode) -> bool {
  matches!(
    status,
    StatusCode::MOVED_PERMANENTLY
      | StatusCode::FOUND
      | StatusCode::SEE_OTHER
      | StatusCode::TEMPORARY_REDIRECT
      | StatusCode::PERMANENT_REDIRECT
  )
}

/// Resolve the `Location` header of a redirect against the current uri.
pub(crate) fn location(current: &http::Uri, headers: &HeaderMap) -> Option<http::Uri> {
  let val = headers.get(LOCATION)?.to_str().ok()?;
  if val.starts_with("https://") || val.starts_with("http://") {
    return http::Uri::from_str(val).ok();
  }
  let path = if val.starts_with('/') {
    val.to_string()
  } else {
    let base = current.path();
    let dir = match base.rfind('/') {
      Some(i) => &base[..=i],
      None => "/",
    };
    format!("{}{}", dir, val)
  };
  http::Uri::builder()
    .scheme(current.scheme_str()?)
    .authority(current.authority()?.as_str())
    .path_and_query(path.as_str())
    .build()
    .ok()
}

pub(crate) fn remove_sensitive_headers(
  headers: &mut HeaderMap,
  next: &http::Uri,
  previous: &[http::Uri],
) {
  if let Some(previous) = previous.last() {
    let cross_host = next.host() != previous.host() || next.port_u16() != previous.port_u16();
    if cross_host {
      headers.remove(AUTHORIZATION);
      headers.remove(COOKIE);
      headers.remove("cookie2");
      headers.remove(PROXY_AUTHORIZATION);
      headers.remove(WWW_AUTHENTICATE);
    }
  }
}
