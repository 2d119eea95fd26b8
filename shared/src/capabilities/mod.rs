mod http;
mod push;
mod timer;

pub use self::http::{
    Http, HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpResult,
    ValidatedUrl, DEFAULT_TIMEOUT_MS, MAX_RESPONSE_BODY_SIZE, MAX_TIMEOUT_MS,
};
pub use self::push::{Push, PushError, PushOperation, PushOutput};
pub use self::timer::{Timer, TimerOperation, TimerOutput};

/// Crux's built-in Render covers view updates as-is.
pub use crux_core::render::Render;

use crate::app::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub http: Http<Event>,
    pub push: Push<Event>,
    pub timer: Timer<Event>,
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    //! Helpers for driving [`App`] through crux's `AppTester`.

    use super::*;
    use crate::model::Model;
    use crux_core::capability::Operation;
    use crux_core::testing::{AppTester, Update};
    use crux_core::Request;
    use std::collections::VecDeque;

    pub type Tester = AppTester<App, Effect>;

    /// Effects from one settled update, split by capability.
    #[derive(Default)]
    pub struct Requested {
        pub http: Vec<Request<HttpRequest>>,
        pub push: Vec<Request<PushOperation>>,
        pub timers: Vec<Request<TimerOperation>>,
        pub renders: usize,
    }

    impl Requested {
        pub fn is_empty(&self) -> bool {
            self.http.is_empty() && self.push.is_empty() && self.timers.is_empty() && self.renders == 0
        }

        pub fn push_operations(&self) -> Vec<PushOperation> {
            self.push.iter().map(|r| r.operation.clone()).collect()
        }

        pub fn timer_operations(&self) -> Vec<TimerOperation> {
            self.timers.iter().map(|r| r.operation).collect()
        }

        /// Takes the single HTTP request, failing if there isn't exactly one.
        pub fn only_http(&mut self) -> Request<HttpRequest> {
            assert_eq!(self.http.len(), 1, "expected exactly one request");
            self.http.remove(0)
        }

        /// Takes the first push `Open`.
        pub fn only_open(&mut self) -> Request<PushOperation> {
            let position = self
                .push
                .iter()
                .position(|r| matches!(r.operation, PushOperation::Open { .. }))
                .expect("expected a push open");
            self.push.remove(position)
        }

        pub fn only_timer(&mut self) -> Request<TimerOperation> {
            assert_eq!(self.timers.len(), 1, "expected exactly one timer");
            self.timers.remove(0)
        }

        fn absorb(&mut self, effects: Vec<Effect>) {
            for effect in effects {
                match effect {
                    Effect::Render(_) => self.renders += 1,
                    Effect::Http(request) => self.http.push(request),
                    Effect::Push(request) => self.push.push(request),
                    Effect::Timer(request) => self.timers.push(request),
                }
            }
        }
    }

    /// Feeds events raised by capabilities back into the app until none are
    /// left, collecting every effect along the way.
    pub fn settle(app: &Tester, update: Update<Effect, Event>, model: &mut Model) -> Requested {
        let mut requested = Requested::default();
        let mut pending = VecDeque::from([update]);
        while let Some(update) = pending.pop_front() {
            requested.absorb(update.effects);
            for event in update.events {
                pending.push_back(app.update(event, model));
            }
        }
        requested
    }

    pub fn update(app: &Tester, event: Event, model: &mut Model) -> Requested {
        let update = app.update(event, model);
        settle(app, update, model)
    }

    pub fn resolve<Op: Operation>(
        app: &Tester,
        request: &mut Request<Op>,
        output: Op::Output,
        model: &mut Model,
    ) -> Requested {
        let update = app.resolve(request, output).expect("request resolves");
        settle(app, update, model)
    }

    pub fn json_response<T: serde::Serialize>(status: u16, body: &T) -> HttpResult {
        let mut headers = HttpHeaders::new();
        headers
            .insert("Content-Type", "application/json")
            .expect("static header is valid");
        Ok(HttpResponse::new(
            status,
            headers,
            serde_json::to_vec(body).expect("test body serializes"),
            "test-request".into(),
        ))
    }

    pub fn connection_refused() -> HttpResult {
        Err(HttpError::Connection {
            host: "localhost".into(),
            message: "connection refused".into(),
        })
    }
}
