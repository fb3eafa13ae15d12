
use crate::cors::CorsPolicy;
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::ORIGIN;
use actix_web::http::Method;
use actix_web::HttpResponse;
use futures::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;

/// CORS middleware for the functions.
///
/// Resolves the allowed origin once per request and attaches the CORS headers to every response
/// that leaves the service. Handler and extractor errors are already rendered into responses by
/// then, so they carry the headers too. `OPTIONS` requests to any path are answered with an
/// empty 200 without reaching the wrapped service.
#[derive(Clone)]
pub struct CorsGate {
    policy: Rc<CorsPolicy>,
}

impl CorsGate {
    pub fn new(policy: CorsPolicy) -> Self {
        Self {
            policy: Rc::new(policy),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for CorsGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = CorsGateMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(CorsGateMiddleware {
            service: Rc::new(service),
            policy: self.policy.clone(),
        })
    }
}

pub struct CorsGateMiddleware<S> {
    service: Rc<S>,
    policy: Rc<CorsPolicy>,
}

impl<S, B> Service<ServiceRequest> for CorsGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let origin = req
            .headers()
            .get(ORIGIN)
            .and_then(|value| value.to_str().ok());
        let headers = self.policy.resolve(origin);

        if req.method() == Method::OPTIONS {
            let mut response = HttpResponse::Ok().finish();
            headers.apply(response.headers_mut());
            return Box::pin(ok(req.into_response(response).map_into_right_body()));
        }

        let service = self.service.clone();
        Box::pin(async move {
            let mut response = service.call(req).await?;
            headers.apply(response.headers_mut());
            Ok(response.map_into_left_body())
        })
    }
}
