use std::collections::BTreeMap;
use std::sync::Arc;

use async_stream::stream;
use bytes::Bytes;
use futures_util::StreamExt;
use http::{Request, Response, StatusCode};
use log::debug;

use super::{DavInner, RequestCtx, ResourceView};
use crate::body::Body;
use crate::conditional::{check_mutation, MutationChecks};
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::etag::Etag;
use crate::fs::DavMetaData;
use crate::props::fileprops::is_prop_file;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::xml::{
    self, NsMap, PropContent, PropfindRequest, PropstatGroup, RenderedProp, MULTISTATUS_CLOSE,
    MULTISTATUS_OPEN, NS_DAV, XML_DECL,
};
use crate::DavResult;

// Hard ceiling on depth-infinity traversal.
const MAX_TRAVERSAL_DEPTH: usize = 10;

// Live properties the engine computes.
const LIVE_PROPS: &[&str] = &[
    "creationdate",
    "displayname",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "lockdiscovery",
    "resourcetype",
    "supportedlock",
];

struct PropWriter {
    inner: Arc<DavInner>,
    request: PropfindRequest,
    ns_map: NsMap,
}

impl PropWriter {
    // One <D:response> fragment for one resource.
    async fn resource_response(&mut self, path: &DavPath, meta: &Arc<dyn DavMetaData>) -> String {
        let internal = path.as_internal_string();
        let dead = self
            .inner
            .props
            .get_all(&internal)
            .await
            .unwrap_or_default();

        let mut found = Vec::new();
        let mut missing = Vec::new();

        match &self.request {
            PropfindRequest::AllProp => {
                for name in LIVE_PROPS {
                    if let Some(p) = self.build_live(name, path, meta, true).await {
                        found.push(p);
                    }
                }
                for prop in dead.values() {
                    found.push(RenderedProp {
                        namespace: prop.namespace.clone(),
                        name: prop.name.clone(),
                        content: PropContent::Text(prop.value.clone()),
                    });
                }
            }
            PropfindRequest::PropName => {
                for name in LIVE_PROPS {
                    found.push(RenderedProp {
                        namespace: NS_DAV.to_string(),
                        name: name.to_string(),
                        content: PropContent::Empty,
                    });
                }
                for prop in dead.values() {
                    found.push(RenderedProp {
                        namespace: prop.namespace.clone(),
                        name: prop.name.clone(),
                        content: PropContent::Empty,
                    });
                }
            }
            PropfindRequest::Props(requested) => {
                for want in requested.clone() {
                    if want.namespace == NS_DAV && LIVE_PROPS.contains(&want.name.as_str()) {
                        match self.build_live(&want.name, path, meta, true).await {
                            Some(p) => found.push(p),
                            None => missing.push(RenderedProp {
                                namespace: want.namespace,
                                name: want.name,
                                content: PropContent::Empty,
                            }),
                        }
                        continue;
                    }
                    match dead.get(&crate::props::qualified_name(&want.namespace, &want.name)) {
                        Some(prop) => found.push(RenderedProp {
                            namespace: prop.namespace.clone(),
                            name: prop.name.clone(),
                            content: PropContent::Text(prop.value.clone()),
                        }),
                        None => missing.push(RenderedProp {
                            namespace: want.namespace,
                            name: want.name,
                            content: PropContent::Empty,
                        }),
                    }
                }
            }
        }

        let mut groups = vec![PropstatGroup {
            status: StatusCode::OK,
            props: found,
        }];
        if !missing.is_empty() {
            groups.push(PropstatGroup {
                status: StatusCode::NOT_FOUND,
                props: missing,
            });
        }
        xml::propstat_response(&path.as_url_string_with_prefix(), &groups, &mut self.ns_map)
    }

    async fn build_live(
        &self,
        name: &str,
        path: &DavPath,
        meta: &Arc<dyn DavMetaData>,
        content: bool,
    ) -> Option<RenderedProp> {
        let text = |content: PropContent| {
            Some(RenderedProp {
                namespace: NS_DAV.to_string(),
                name: name.to_string(),
                content,
            })
        };
        match name {
            "creationdate" => {
                let created = meta.created().ok()?;
                text(PropContent::Text(systemtime_to_rfc3339(created)))
            }
            "displayname" => {
                text(PropContent::Text(path.file_name().unwrap_or("").to_string()))
            }
            "getcontentlength" => {
                if meta.is_dir() {
                    return None;
                }
                text(PropContent::Text(meta.len().to_string()))
            }
            "getcontenttype" => {
                let ct = if meta.is_dir() {
                    "httpd/unix-directory"
                } else {
                    path.get_mime_type_str()
                };
                text(PropContent::Text(ct.to_string()))
            }
            "getetag" => text(PropContent::Text(
                Etag::from_meta(&**meta, path).quoted().to_string(),
            )),
            "getlastmodified" => {
                let mtime = meta.modified().ok()?;
                text(PropContent::Text(systemtime_to_httpdate(mtime)))
            }
            "lockdiscovery" => {
                let locks = match (&self.inner.ls, content) {
                    (Some(ls), true) => ls.locks_for(&path.as_internal_string()).await,
                    _ => Vec::new(),
                };
                text(PropContent::LockDiscovery(
                    locks,
                    path.as_url_string_with_prefix(),
                ))
            }
            "resourcetype" => {
                if meta.is_dir() && content {
                    text(PropContent::ResourceTypeCollection)
                } else {
                    text(PropContent::Empty)
                }
            }
            "supportedlock" => text(PropContent::SupportedLock {
                enabled: self.inner.ls.is_some(),
            }),
            _ => None,
        }
    }
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let meta = match &ctx.view {
            ResourceView::Null => return Err(DavError::NotFound),
            ResourceView::File(m) | ResourceView::Collection(m) => Arc::clone(m),
        };

        // RFC 4918 defaults PROPFIND depth to infinity; unparsable
        // values fall back to it as well.
        let depth = davheaders::depth(req, Depth::Infinity);
        let request = xml::parse_propfind(body);

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::MULTI_STATUS;
        let h = res.headers_mut();
        h.insert(
            "content-type",
            "application/xml; charset=utf-8".parse().unwrap(),
        );
        h.insert(
            "cache-control",
            "no-store, no-cache, must-revalidate".parse().unwrap(),
        );
        h.insert("pragma", "no-cache".parse().unwrap());

        let inner = Arc::clone(&self.inner);
        let path = ctx.path.clone();

        // Response entries are emitted as they are produced rather than
        // materializing the whole tree.
        *res.body_mut() = Body::stream(stream! {
            let mut pw = PropWriter {
                inner: Arc::clone(&inner),
                request,
                ns_map: NsMap::new(),
            };

            yield Ok(Bytes::from(format!("{}{}", XML_DECL, MULTISTATUS_OPEN)));
            let fragment = pw.resource_response(&path, &meta).await;
            yield Ok(Bytes::from(fragment));

            if meta.is_dir() && depth != Depth::Zero {
                // iterative walk; level counts from the subject
                let mut stack: Vec<(DavPath, usize)> = vec![(path.clone(), 1)];
                while let Some((dir, level)) = stack.pop() {
                    let mut entries = match inner.fs.read_dir(&dir).await {
                        Ok(entries) => entries,
                        Err(e) => {
                            // unreadable directories are skipped
                            debug!("read_dir {:?} failed: {}", dir, e);
                            continue;
                        }
                    };
                    while let Some(entry) = entries.next().await {
                        let name = entry.name();
                        if is_prop_file(&name) {
                            continue;
                        }
                        let emeta = match entry.metadata().await {
                            Ok(m) => m,
                            Err(e) => {
                                debug!("metadata failed below {:?}: {}", dir, e);
                                continue;
                            }
                        };
                        if emeta.is_symlink() {
                            continue;
                        }
                        let mut child = dir.clone();
                        child.push_segment(&name);
                        let is_dir = emeta.is_dir();
                        if is_dir {
                            child.add_slash();
                        }
                        let emeta: Arc<dyn DavMetaData> = Arc::from(emeta);
                        let fragment = pw.resource_response(&child, &emeta).await;
                        yield Ok(Bytes::from(fragment));
                        if is_dir
                            && depth == Depth::Infinity
                            && level < MAX_TRAVERSAL_DEPTH
                        {
                            stack.push((child, level + 1));
                        }
                    }
                }
            }

            yield Ok(Bytes::from(MULTISTATUS_CLOSE));
        });

        Ok(res)
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        ctx: &RequestCtx,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let inner = &self.inner;

        if !ctx.view.exists() {
            return Err(DavError::NotFound);
        }

        check_mutation(inner, req, &ctx.path, ctx.view.meta(), MutationChecks::none(), &ctx.cache)
            .await?;

        let ops = xml::parse_propertyupdate(body)?;
        let internal = ctx.path.as_internal_string();

        // every operation runs independently; failures are per-property
        let mut results: BTreeMap<u16, Vec<RenderedProp>> = BTreeMap::new();
        for op in ops {
            let rendered = RenderedProp {
                namespace: op.prop.namespace.clone(),
                name: op.prop.name.clone(),
                content: PropContent::Empty,
            };
            let status = if op.remove {
                match inner
                    .props
                    .remove(&internal, &op.prop.namespace, &op.prop.name)
                    .await
                {
                    Ok(true) => StatusCode::OK,
                    Ok(false) => StatusCode::NOT_FOUND,
                    Err(e) => {
                        debug!("property remove failed: {}", e);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                }
            } else {
                match inner.props.set(&internal, op.prop).await {
                    Ok(()) => StatusCode::OK,
                    Err(e) => {
                        debug!("property set failed: {}", e);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                }
            };
            results.entry(status.as_u16()).or_default().push(rendered);
        }

        let groups: Vec<PropstatGroup> = results
            .into_iter()
            .map(|(status, props)| PropstatGroup {
                status: StatusCode::from_u16(status).unwrap(),
                props,
            })
            .collect();

        let mut ns_map = NsMap::new();
        let mut body = String::from(XML_DECL);
        body.push_str(MULTISTATUS_OPEN);
        body.push_str(&xml::propstat_response(
            &ctx.path.as_url_string_with_prefix(),
            &groups,
            &mut ns_map,
        ));
        body.push_str(MULTISTATUS_CLOSE);

        let mut res = Response::new(Body::from(body));
        *res.status_mut() = StatusCode::MULTI_STATUS;
        res.headers_mut().insert(
            "content-type",
            "application/xml; charset=utf-8".parse().unwrap(),
        );
        Ok(res)
    }
}
