//! Bundle handed to the sandbox process.
//!
//! The bundle is the runtime prelude followed by one call,
//! `__stagehandBoot(config, modules)`, whose arguments are JSON produced from
//! the [`LinkedProgram`]. The prelude owns the per-boot instance cache and
//! the only resolution it performs is a lookup in each module's target table.
//!
//! Events are written to stdout as newline-delimited JSON, see
//! [`SandboxEvent`](super::SandboxEvent).

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::loader::externals::ExternalBinding;
use crate::loader::{RenderMode, Target};

use super::BootRequest;
use super::shell::DocumentElement;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BootConfig<'a> {
    entry: &'a str,
    mode: RenderMode,
    mount_id: &'a str,
    settle_ms: u64,
    externals: &'a BTreeMap<String, ExternalBinding>,
    elements: &'a [DocumentElement],
}

#[derive(Serialize)]
struct ModuleRecord<'a> {
    code: &'a str,
    targets: &'a BTreeMap<String, Target>,
}

/// Render the complete script for one boot.
pub fn render(request: &BootRequest) -> Result<String> {
    let program = &request.program;
    let config = BootConfig {
        entry: &program.entry,
        mode: program.mode,
        mount_id: &request.mount_id,
        settle_ms: u64::try_from(request.settle.as_millis()).unwrap_or(u64::MAX),
        externals: &program.externals,
        elements: &request.elements,
    };
    let modules: BTreeMap<&str, ModuleRecord<'_>> = program
        .modules
        .iter()
        .map(|m| {
            (
                m.path.as_str(),
                ModuleRecord {
                    code: &m.code,
                    targets: &m.targets,
                },
            )
        })
        .collect();

    let config = serde_json::to_string(&config).context("Failed to serialize boot config")?;
    let modules = serde_json::to_string(&modules).context("Failed to serialize linked modules")?;

    let mut bundle = String::with_capacity(PRELUDE.len() + config.len() + modules.len() + 32);
    bundle.push_str(PRELUDE);
    bundle.push_str("\n__stagehandBoot(");
    bundle.push_str(&config);
    bundle.push_str(", ");
    bundle.push_str(&modules);
    bundle.push_str(");\n");
    Ok(bundle)
}

pub const PRELUDE: &str = r###""use strict";
const vm = require("vm");
const fs = require("fs");
const util = require("util");
const hostProcess = process;

function __stagehandBoot(config, modules) {
  const emit = (event) => {
    try {
      fs.writeSync(1, JSON.stringify(event) + "\n");
    } catch (_) {}
  };

  // ---- faults -----------------------------------------------------------
  const modulePaths = Object.keys(modules);
  const reported = new Set();

  function attribute(error) {
    if (error && typeof error === "object" && error.__stagehandPath) return error.__stagehandPath;
    const stack = error && error.stack ? String(error.stack) : "";
    for (const line of stack.split("\n").slice(1)) {
      for (const path of modulePaths) {
        if (line.includes("(" + path + ":") || line.includes("at " + path + ":")) return path;
      }
    }
    return null;
  }

  function describeError(error) {
    if (error instanceof Error) return (error.name || "Error") + ": " + error.message;
    if (error && typeof error === "object" && typeof error.message === "string") return error.message;
    return "Uncaught " + String(error);
  }

  function describeValue(value) {
    if (value === undefined) return "undefined";
    if (value === null) return "null";
    if (Array.isArray(value)) return "an array";
    switch (typeof value) {
      case "string": return "a string";
      case "number": return "the number " + value;
      case "boolean": return "a boolean";
      case "object": return "a plain object";
      default: return typeof value;
    }
  }

  function reportFault(kind, message, path) {
    const key = kind + "\u0000" + message + "\u0000" + (path || "");
    if (reported.has(key)) return;
    reported.add(key);
    emit({ type: "fault", kind, message, path: path || null });
  }

  const reportError = (error) => reportFault("runtime", describeError(error), attribute(error));

  hostProcess.on("uncaughtException", reportError);
  hostProcess.on("unhandledRejection", (reason) => reportError(reason));

  for (const level of ["log", "info", "warn", "error", "debug"]) {
    console[level] = (...args) => emit({ type: "log", level, message: util.format(...args) });
  }

  const registerStyle = (path, css) => emit({ type: "style", path, css: String(css) });

  // ---- document ---------------------------------------------------------
  const VOID = new Set(["area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr"]);
  const escapeHtml = (value) =>
    String(value)
      .replace(/&/g, "&amp;")
      .replace(/</g, "&lt;")
      .replace(/>/g, "&gt;")
      .replace(/"/g, "&quot;")
      .replace(/'/g, "&#39;");

  class ShimText {
    constructor(text) {
      this.nodeType = 3;
      this.data = String(text);
      this.parentNode = null;
    }
    get textContent() { return this.data; }
    set textContent(value) { this.data = String(value); }
    serialize() { return escapeHtml(this.data); }
  }

  class ShimMarkup {
    constructor(html) {
      this.nodeType = 3;
      this.html = String(html);
      this.parentNode = null;
    }
    get textContent() { return this.html.replace(/<[^>]*>/g, ""); }
    serialize() { return this.html; }
  }

  function walk(node, visit) {
    for (const child of node.childNodes) {
      if (child.nodeType === 1) {
        visit(child);
        walk(child, visit);
      }
    }
  }

  function matchesSelector(element, selector) {
    const text = String(selector).trim();
    if (text.startsWith("#")) return element.id === text.slice(1);
    if (text.startsWith(".")) return element.classList.contains(text.slice(1));
    const parts = /^([a-zA-Z][\w-]*)(?:([.#])([\w-]+))?$/.exec(text);
    if (!parts || element.localName !== parts[1].toLowerCase()) return false;
    if (!parts[2]) return true;
    return parts[2] === "#" ? element.id === parts[3] : element.classList.contains(parts[3]);
  }

  class ShimElement {
    constructor(tag) {
      this.nodeType = 1;
      this.localName = String(tag).toLowerCase();
      this.tagName = this.localName.toUpperCase();
      this.attributes = Object.create(null);
      this.childNodes = [];
      this.parentNode = null;
      this.style = {};
      this.dataset = {};
      const self = this;
      this.classList = {
        add: (...names) => {
          const set = new Set(self.className.split(/\s+/).filter(Boolean));
          names.forEach((name) => set.add(name));
          self.className = [...set].join(" ");
        },
        remove: (...names) => {
          self.className = self.className.split(/\s+/).filter((c) => c && !names.includes(c)).join(" ");
        },
        toggle: (name, force) => {
          const has = self.classList.contains(name);
          const want = force === undefined ? !has : Boolean(force);
          if (want && !has) self.classList.add(name);
          if (!want && has) self.classList.remove(name);
          return want;
        },
        contains: (name) => self.className.split(/\s+/).includes(name),
      };
    }
    get id() { return this.attributes.id || ""; }
    set id(value) { this.attributes.id = String(value); }
    get className() { return this.attributes.class || ""; }
    set className(value) { this.attributes.class = String(value); }
    get value() { return this.attributes.value || ""; }
    set value(value) { this.attributes.value = String(value); }
    get children() { return this.childNodes.filter((node) => node.nodeType === 1); }
    get firstChild() { return this.childNodes[0] || null; }
    get lastChild() { return this.childNodes[this.childNodes.length - 1] || null; }
    get textContent() { return this.childNodes.map((node) => node.textContent).join(""); }
    set textContent(value) {
      this.childNodes = [];
      if (value !== null && value !== undefined && value !== "") this.appendChild(new ShimText(value));
    }
    get innerText() { return this.textContent; }
    set innerText(value) { this.textContent = value; }
    get innerHTML() { return this.childNodes.map((node) => node.serialize()).join(""); }
    set innerHTML(value) {
      this.childNodes = [];
      if (value) this.appendChild(new ShimMarkup(value));
    }
    get outerHTML() { return this.serialize(); }
    setAttribute(name, value) { this.attributes[name] = String(value); }
    getAttribute(name) { return name in this.attributes ? this.attributes[name] : null; }
    hasAttribute(name) { return name in this.attributes; }
    removeAttribute(name) { delete this.attributes[name]; }
    appendChild(node) {
      if (node.parentNode) node.parentNode.removeChild(node);
      node.parentNode = this;
      this.childNodes.push(node);
      return node;
    }
    append(...nodes) {
      for (const node of nodes) this.appendChild(node !== null && typeof node === "object" ? node : new ShimText(node));
    }
    insertBefore(node, reference) {
      const index = this.childNodes.indexOf(reference);
      if (index < 0) return this.appendChild(node);
      if (node.parentNode) node.parentNode.removeChild(node);
      node.parentNode = this;
      this.childNodes.splice(index, 0, node);
      return node;
    }
    removeChild(node) {
      const index = this.childNodes.indexOf(node);
      if (index >= 0) this.childNodes.splice(index, 1);
      node.parentNode = null;
      return node;
    }
    remove() { if (this.parentNode) this.parentNode.removeChild(this); }
    replaceChildren(...nodes) {
      this.childNodes = [];
      this.append(...nodes);
    }
    addEventListener() {}
    removeEventListener() {}
    dispatchEvent() { return true; }
    focus() {}
    blur() {}
    click() {}
    scrollIntoView() {}
    getBoundingClientRect() { return { x: 0, y: 0, top: 0, left: 0, right: 0, bottom: 0, width: 0, height: 0 }; }
    closest(selector) {
      let node = this;
      while (node && node.nodeType === 1) {
        if (matchesSelector(node, selector)) return node;
        node = node.parentNode;
      }
      return null;
    }
    matches(selector) { return matchesSelector(this, selector); }
    querySelectorAll(selector) {
      const found = [];
      walk(this, (element) => { if (matchesSelector(element, selector)) found.push(element); });
      return found;
    }
    querySelector(selector) { return this.querySelectorAll(selector)[0] || null; }
    getElementsByTagName(tag) { return this.querySelectorAll(tag); }
    getElementsByClassName(name) { return this.querySelectorAll("." + name); }
    serialize() {
      const attributes = Object.keys(this.attributes)
        .map((name) => " " + name + "=\"" + escapeHtml(this.attributes[name]) + "\"")
        .join("");
      const css = styleText(this.style);
      const style = css ? " style=\"" + escapeHtml(css) + "\"" : "";
      if (VOID.has(this.localName)) return "<" + this.localName + attributes + style + " />";
      return "<" + this.localName + attributes + style + ">" + this.innerHTML + "</" + this.localName + ">";
    }
  }

  const htmlElement = new ShimElement("html");
  const head = new ShimElement("head");
  const body = new ShimElement("body");
  htmlElement.appendChild(head);
  htmlElement.appendChild(body);
  for (const stub of config.elements) {
    if (stub.tag === "html" || stub.tag === "head" || stub.tag === "body") continue;
    const element = new ShimElement(stub.tag);
    if (stub.id) element.id = stub.id;
    if (stub.classes.length) element.className = stub.classes.join(" ");
    body.appendChild(element);
  }
  let mount = config.mountId ? body.querySelector("#" + config.mountId) : null;
  if (!mount && config.mountId) {
    mount = new ShimElement("div");
    mount.id = config.mountId;
    body.appendChild(mount);
  }

  const document = {
    nodeType: 9,
    documentElement: htmlElement,
    head,
    body,
    title: "",
    cookie: "",
    readyState: "complete",
    getElementById: (id) => htmlElement.querySelector("#" + id),
    querySelector: (selector) => htmlElement.querySelector(selector),
    querySelectorAll: (selector) => htmlElement.querySelectorAll(selector),
    getElementsByTagName: (tag) => htmlElement.querySelectorAll(tag),
    getElementsByClassName: (name) => htmlElement.querySelectorAll("." + name),
    createElement: (tag) => new ShimElement(tag),
    createElementNS: (_, tag) => new ShimElement(tag),
    createTextNode: (text) => new ShimText(text),
    addEventListener() {},
    removeEventListener() {},
    dispatchEvent() { return true; },
  };

  const memoryStorage = () => {
    const data = new Map();
    return {
      getItem: (key) => (data.has(String(key)) ? data.get(String(key)) : null),
      setItem: (key, value) => { data.set(String(key), String(value)); },
      removeItem: (key) => { data.delete(String(key)); },
      clear: () => data.clear(),
      key: (index) => [...data.keys()][index] ?? null,
      get length() { return data.size; },
    };
  };

  Object.assign(globalThis, {
    document,
    window: globalThis,
    self: globalThis,
    location: {
      href: "http://localhost/", origin: "http://localhost", protocol: "http:", host: "localhost",
      hostname: "localhost", port: "", pathname: "/", search: "", hash: "",
      assign() {}, replace() {}, reload() {},
    },
    history: { length: 1, state: null, pushState() {}, replaceState() {}, back() {}, forward() {}, go() {} },
    localStorage: memoryStorage(),
    sessionStorage: memoryStorage(),
    requestAnimationFrame: (callback) => setTimeout(() => callback(Date.now()), 16),
    cancelAnimationFrame: (handle) => clearTimeout(handle),
    matchMedia: (media) => ({
      matches: false, media: String(media), onchange: null,
      addListener() {}, removeListener() {}, addEventListener() {}, removeEventListener() {},
    }),
    getComputedStyle: () => ({ getPropertyValue: () => "" }),
    addEventListener() {},
    removeEventListener() {},
    dispatchEvent() { return true; },
    scrollTo() {},
    alert() {},
    confirm: () => false,
    prompt: () => null,
    innerWidth: 1280,
    innerHeight: 800,
    devicePixelRatio: 1,
    HTMLElement: ShimElement,
    Element: ShimElement,
    Node: ShimElement,
  });
  if (typeof globalThis.navigator === "undefined") {
    globalThis.navigator = { userAgent: "stagehand", language: "en-US", languages: ["en-US"], onLine: true };
  }

  // ---- host isolation ---------------------------------------------------
  // Project code sees a browser-like process and no network.
  const offline = (api) => function () {
    throw new Error(api + " is not available in the preview sandbox");
  };
  Object.defineProperty(globalThis, "process", {
    value: Object.freeze({
      env: Object.freeze({ NODE_ENV: "development" }),
      browser: true,
      argv: Object.freeze([]),
      platform: "browser",
      nextTick: (callback, ...args) => queueMicrotask(() => callback(...args)),
    }),
    configurable: true,
    writable: true,
    enumerable: false,
  });
  Object.assign(globalThis, {
    fetch: (input) => Promise.reject(new Error("fetch is not available in the preview sandbox: " + String(input))),
    XMLHttpRequest: offline("XMLHttpRequest"),
    WebSocket: offline("WebSocket"),
    EventSource: offline("EventSource"),
  });

  // ---- framework shim ---------------------------------------------------
  const ELEMENT = Symbol.for("react.element");
  const FRAGMENT = Symbol.for("react.fragment");
  const SUSPENSE = Symbol.for("react.suspense");
  const PROVIDER = Symbol.for("react.provider");
  const CONSUMER = Symbol.for("react.consumer");
  const CONTEXT = Symbol.for("react.context");
  const MEMO = Symbol.for("react.memo");
  const FORWARD_REF = Symbol.for("react.forward_ref");
  const LAZY = Symbol.for("react.lazy");

  const isElement = (value) => value !== null && typeof value === "object" && value.$$typeof === ELEMENT;
  const isComponentType = (value) =>
    typeof value === "function" ||
    (value !== null && typeof value === "object" && [MEMO, FORWARD_REF, LAZY].includes(value.$$typeof));

  function createElement(type, config, ...children) {
    const props = {};
    let key = null;
    let ref = null;
    if (config) {
      for (const name of Object.keys(config)) {
        if (name === "key") key = config.key === undefined ? null : String(config.key);
        else if (name === "ref") ref = config.ref;
        else props[name] = config[name];
      }
    }
    if (children.length === 1) props.children = children[0];
    else if (children.length > 1) props.children = children;
    if (type && type.defaultProps) {
      for (const name of Object.keys(type.defaultProps)) {
        if (props[name] === undefined) props[name] = type.defaultProps[name];
      }
    }
    return { $$typeof: ELEMENT, type, key, ref, props };
  }

  function cloneElement(element, config, ...children) {
    const props = Object.assign({}, element.props);
    let key = element.key;
    let ref = element.ref;
    if (config) {
      for (const name of Object.keys(config)) {
        if (name === "key") key = String(config.key);
        else if (name === "ref") ref = config.ref;
        else props[name] = config[name];
      }
    }
    if (children.length === 1) props.children = children[0];
    else if (children.length > 1) props.children = children;
    return { $$typeof: ELEMENT, type: element.type, key, ref, props };
  }

  function toArray(children) {
    const out = [];
    const visit = (child) => {
      if (Array.isArray(child)) child.forEach(visit);
      else if (child !== null && child !== undefined && typeof child !== "boolean") out.push(child);
    };
    visit(children);
    return out;
  }

  const Children = {
    toArray,
    map: (children, fn) => toArray(children).map(fn),
    forEach: (children, fn) => toArray(children).forEach(fn),
    count: (children) => toArray(children).length,
    only: (children) => {
      const list = toArray(children);
      if (list.length !== 1) throw new Error("React.Children.only expected to receive a single React element child.");
      return list[0];
    },
  };

  function createContext(defaultValue) {
    const context = { $$typeof: CONTEXT, _currentValue: defaultValue };
    context.Provider = { $$typeof: PROVIDER, _context: context };
    context.Consumer = { $$typeof: CONSUMER, _context: context };
    return context;
  }

  // Hooks state survives re-renders of the same tree position.
  const hookStore = new Map();
  const classInstances = new Map();
  let currentSlots = null;
  let hookIndex = 0;
  let pendingEffects = [];
  let idCounter = 0;

  function nextSlot(init) {
    if (!currentSlots) throw new Error("Invalid hook call. Hooks can only be called inside of the body of a function component.");
    if (hookIndex >= currentSlots.length) currentSlots.push(init());
    return currentSlots[hookIndex++];
  }

  const depsChanged = (previous, next) =>
    !previous || !next || previous.length !== next.length || next.some((dep, i) => !Object.is(dep, previous[i]));

  function useReducer(reducer, initialArg, init) {
    const slot = nextSlot(() => ({ state: init ? init(initialArg) : initialArg }));
    slot.reducer = reducer;
    if (!slot.dispatch) {
      slot.dispatch = (action) => {
        const next = slot.reducer(slot.state, action);
        if (!Object.is(next, slot.state)) {
          slot.state = next;
          requestRender();
        }
      };
    }
    return [slot.state, slot.dispatch];
  }

  const useState = (initial) =>
    useReducer(
      (state, action) => (typeof action === "function" ? action(state) : action),
      undefined,
      () => (typeof initial === "function" ? initial() : initial),
    );

  function useEffect(create, deps) {
    const slot = nextSlot(() => ({ fresh: true, deps: undefined, cleanup: null }));
    if (slot.fresh || depsChanged(slot.deps, deps)) {
      slot.fresh = false;
      slot.deps = deps;
      pendingEffects.push(() => {
        if (typeof slot.cleanup === "function") slot.cleanup();
        const result = create();
        slot.cleanup = typeof result === "function" ? result : null;
      });
    }
  }

  function useMemo(factory, deps) {
    const slot = nextSlot(() => ({ fresh: true }));
    if (slot.fresh || depsChanged(slot.deps, deps)) {
      slot.fresh = false;
      slot.deps = deps;
      slot.value = factory();
    }
    return slot.value;
  }

  class Component {
    constructor(props, context) {
      this.props = props;
      this.context = context;
    }
    setState(partial, callback) {
      const next = typeof partial === "function" ? partial(this.state, this.props) : partial;
      if (next) {
        this.state = Object.assign({}, this.state, next);
        requestRender();
      }
      if (callback) pendingEffects.push(callback);
    }
    forceUpdate() { requestRender(); }
  }
  Component.prototype.isReactComponent = {};
  class PureComponent extends Component {}

  const React = {
    createElement,
    cloneElement,
    isValidElement: isElement,
    createContext,
    createRef: () => ({ current: null }),
    Children,
    Component,
    PureComponent,
    Fragment: FRAGMENT,
    StrictMode: FRAGMENT,
    Suspense: SUSPENSE,
    memo: (type) => ({ $$typeof: MEMO, type }),
    forwardRef: (render) => ({ $$typeof: FORWARD_REF, render }),
    lazy: (load) => ({ $$typeof: LAZY, load, status: "pending", resolved: null, error: null }),
    useState,
    useReducer,
    useEffect,
    useLayoutEffect: useEffect,
    useInsertionEffect: useEffect,
    useMemo,
    useCallback: (fn, deps) => useMemo(() => fn, deps),
    useRef: (initial) => nextSlot(() => ({ current: initial })),
    useContext: (context) => context._currentValue,
    useId: () => nextSlot(() => ({ id: ":r" + (idCounter++).toString(36) + ":" })).id,
    useTransition: () => [false, (fn) => fn()],
    useDeferredValue: (value) => value,
    useSyncExternalStore: (subscribe, getSnapshot) => getSnapshot(),
    useImperativeHandle: () => {},
    useDebugValue: () => {},
    startTransition: (fn) => fn(),
    version: "18.3.1",
  };

  const jsx = (type, props, key) => {
    const element = createElement(type, props);
    if (key !== undefined) element.key = String(key);
    return element;
  };
  const jsxRuntime = { jsx, jsxs: jsx, jsxDEV: jsx, Fragment: FRAGMENT };

  // ---- server renderer --------------------------------------------------
  const UNITLESS = new Set(["opacity", "zIndex", "fontWeight", "lineHeight", "flex", "flexGrow", "flexShrink", "order", "zoom", "gridRow", "gridColumn"]);
  const ATTRIBUTE_NAMES = {
    className: "class", htmlFor: "for", tabIndex: "tabindex", readOnly: "readonly", autoFocus: "autofocus",
    autoComplete: "autocomplete", maxLength: "maxlength", colSpan: "colspan", rowSpan: "rowspan",
    crossOrigin: "crossorigin", strokeWidth: "stroke-width", strokeLinecap: "stroke-linecap",
    strokeLinejoin: "stroke-linejoin", fillRule: "fill-rule", clipRule: "clip-rule",
    defaultValue: "value", defaultChecked: "checked",
  };
  const SKIPPED_PROPS = new Set(["children", "dangerouslySetInnerHTML", "key", "ref", "suppressHydrationWarning", "suppressContentEditableWarning"]);

  function styleText(style) {
    if (!style || typeof style !== "object") return style ? String(style) : "";
    return Object.keys(style)
      .filter((name) => style[name] !== null && style[name] !== undefined && style[name] !== false && style[name] !== "")
      .map((name) => {
        const value = style[name];
        const property = name.startsWith("--") ? name : name.replace(/[A-Z]/g, (c) => "-" + c.toLowerCase());
        const text = typeof value === "number" && value !== 0 && !UNITLESS.has(name) ? value + "px" : String(value);
        return property + ":" + text;
      })
      .join(";");
  }

  function renderAttributes(props) {
    let out = "";
    for (const name of Object.keys(props)) {
      const value = props[name];
      if (SKIPPED_PROPS.has(name) || /^on[A-Z]/.test(name)) continue;
      if (value === null || value === undefined || value === false || typeof value === "function") continue;
      const attribute = ATTRIBUTE_NAMES[name] || name;
      if (name === "style") {
        const css = styleText(value);
        if (css) out += " style=\"" + escapeHtml(css) + "\"";
      } else if (value === true) {
        out += attribute.startsWith("aria-") || attribute.startsWith("data-") ? " " + attribute + "=\"true\"" : " " + attribute;
      } else {
        out += " " + attribute + "=\"" + escapeHtml(value) + "\"";
      }
    }
    return out;
  }

  function withContext(context, value, render) {
    const previous = context._currentValue;
    context._currentValue = value;
    try {
      return render();
    } finally {
      context._currentValue = previous;
    }
  }

  function renderFunction(type, props, key, ref) {
    const slotKey = key + ":" + (type.displayName || type.name || "anonymous");
    if (!hookStore.has(slotKey)) hookStore.set(slotKey, []);
    const saved = [currentSlots, hookIndex];
    currentSlots = hookStore.get(slotKey);
    hookIndex = 0;
    let result;
    try {
      result = ref === undefined ? type(props) : type(props, ref);
    } finally {
      [currentSlots, hookIndex] = saved;
    }
    return renderNode(result, slotKey);
  }

  function renderClass(type, props, key) {
    const slotKey = key + ":" + (type.displayName || type.name || "Component");
    const context = type.contextType ? type.contextType._currentValue : undefined;
    let instance = classInstances.get(slotKey);
    if (!instance) {
      instance = new type(props, context);
      if (instance.state === undefined) instance.state = null;
      classInstances.set(slotKey, instance);
      if (typeof instance.componentDidMount === "function") pendingEffects.push(() => instance.componentDidMount());
    }
    instance.props = props;
    instance.context = context;
    if (typeof type.getDerivedStateFromProps === "function") {
      const derived = type.getDerivedStateFromProps(props, instance.state);
      if (derived) instance.state = Object.assign({}, instance.state, derived);
    }
    const saved = [currentSlots, hookIndex];
    currentSlots = null;
    try {
      const isBoundary = typeof type.getDerivedStateFromError === "function" || typeof instance.componentDidCatch === "function";
      if (!isBoundary) return renderNode(instance.render(), slotKey);
      try {
        return renderNode(instance.render(), slotKey);
      } catch (error) {
        emit({ type: "log", level: "error", message: "Error boundary caught: " + describeError(error) });
        if (typeof type.getDerivedStateFromError === "function") {
          instance.state = Object.assign({}, instance.state, type.getDerivedStateFromError(error));
        }
        if (typeof instance.componentDidCatch === "function") {
          pendingEffects.push(() => instance.componentDidCatch(error, { componentStack: "" }));
        }
        return renderNode(instance.render(), slotKey);
      }
    } finally {
      [currentSlots, hookIndex] = saved;
    }
  }

  function renderLazy(type, props, key) {
    if (type.status === "resolved") return renderNode(createElement(type.resolved, props), key);
    if (type.status === "rejected") throw type.error;
    if (type.status === "pending") {
      type.status = "loading";
      Promise.resolve()
        .then(() => type.load())
        .then(
          (loaded) => {
            type.status = "resolved";
            type.resolved = loaded && loaded.default !== undefined ? loaded.default : loaded;
            requestRender();
          },
          (error) => {
            type.status = "rejected";
            type.error = error;
            requestRender();
          },
        );
    }
    return "";
  }

  function renderNode(node, key) {
    if (node === null || node === undefined || typeof node === "boolean") return "";
    if (typeof node === "string" || typeof node === "number" || typeof node === "bigint") return escapeHtml(node);
    if (Array.isArray(node)) {
      return node
        .map((child, i) => renderNode(child, key + "." + (isElement(child) && child.key !== null ? "$" + child.key : i)))
        .join("");
    }
    if (!isElement(node)) {
      if (typeof node === "object" && typeof node[Symbol.iterator] === "function") return renderNode(Array.from(node), key);
      if (typeof node === "object" && typeof node.then === "function") return "";
      throw new Error("Objects are not valid as a React child (found: object with keys {" + Object.keys(node).join(", ") + "})");
    }

    const { type, props } = node;
    if (typeof type === "string") {
      const attributes = renderAttributes(props);
      if (VOID.has(type)) return "<" + type + attributes + " />";
      let inner;
      if (props.dangerouslySetInnerHTML && props.dangerouslySetInnerHTML.__html != null) {
        inner = String(props.dangerouslySetInnerHTML.__html);
      } else if (type === "textarea" && props.value != null) {
        inner = escapeHtml(props.value);
      } else {
        inner = renderNode(props.children, key + ".0");
      }
      return "<" + type + attributes + ">" + inner + "</" + type + ">";
    }
    if (type === FRAGMENT || type === SUSPENSE) return renderNode(props.children, key);
    if (typeof type === "function") {
      if (type.prototype && type.prototype.isReactComponent) return renderClass(type, props, key);
      return renderFunction(type, props, key);
    }
    if (type !== null && typeof type === "object") {
      switch (type.$$typeof) {
        case PROVIDER:
          return withContext(type._context, props.value, () => renderNode(props.children, key));
        case CONTEXT:
          return withContext(type, props.value, () => renderNode(props.children, key));
        case CONSUMER:
          return renderNode(props.children(type._context._currentValue), key);
        case MEMO:
          return renderNode(Object.assign({}, node, { type: type.type }), key);
        case FORWARD_REF:
          return renderFunction(type.render, props, key, node.ref);
        case LAZY:
          return renderLazy(type, props, key);
        default:
          break;
      }
    }
    throw new Error("Element type is invalid: expected a string or a component but got: " + describeValue(type));
  }

  // ---- root -------------------------------------------------------------
  const MAX_RENDERS = 50;
  let rootElement = null;
  let rootContainer = mount;
  let renderRequested = false;
  let renderCount = 0;

  function requestRender() {
    if (rootElement === null || renderRequested) return;
    renderRequested = true;
    setImmediate(flush);
  }

  function flush() {
    renderRequested = false;
    if (rootElement === null) return;
    renderCount += 1;
    if (renderCount > MAX_RENDERS) {
      if (renderCount === MAX_RENDERS + 1) {
        reportFault("runtime", "Too many re-renders: the component tree updates state on every render.", config.entry);
      }
      return;
    }
    pendingEffects = [];
    let html;
    try {
      html = renderNode(rootElement, "0");
    } catch (error) {
      pendingEffects = [];
      reportError(error);
      return;
    }
    if (rootContainer) rootContainer.innerHTML = html;
    emit({ type: "rendered", html });
    const effects = pendingEffects;
    pendingEffects = [];
    for (const effect of effects) {
      try {
        effect();
      } catch (error) {
        reportError(error);
      }
    }
  }

  function mountRoot(container, element) {
    // Component programs render the entry's default export instead.
    if (config.mode === "component") return;
    rootContainer = container;
    rootElement = element;
    requestRender();
  }

  const ReactDOM = {
    createRoot: (container) => ({
      render: (element) => mountRoot(container, element),
      unmount: () => {
        if (rootContainer === container) rootElement = null;
      },
    }),
    hydrateRoot: (container, element) => {
      mountRoot(container, element);
      return { render: (next) => mountRoot(container, next), unmount: () => {} };
    },
    render: (element, container) => mountRoot(container, element),
    createPortal: (children) => children,
    flushSync: (fn) => fn(),
    version: React.version,
  };

  // ---- router shim ------------------------------------------------------
  const router = (() => {
    const h = createElement;
    const state = { location: null, seeded: false };
    const parseLocation = (to) => {
      const base = "http://localhost" + (state.location ? state.location.pathname : "/");
      const url = new URL(typeof to === "string" ? to : (to && to.pathname) || "/", base);
      return { pathname: url.pathname, search: url.search, hash: url.hash, state: null, key: "default" };
    };
    state.location = parseLocation("/");

    const RouterContext = createContext(null);
    const RouteContext = createContext({ matches: [], depth: -1, params: {} });

    function navigate(to, options) {
      if (typeof to === "number") return;
      state.location = parseLocation(to);
      if (options && options.state !== undefined) state.location.state = options.state;
      requestRender();
    }

    function Router({ children, initialEntries }) {
      if (!state.seeded) {
        state.seeded = true;
        if (initialEntries && initialEntries.length) state.location = parseLocation(initialEntries[0]);
      }
      return h(RouterContext.Provider, { value: { location: state.location, navigate } }, children);
    }

    const splitPath = (path) => String(path || "").split("/").filter(Boolean);

    function fromElements(children) {
      const routes = [];
      for (const child of toArray(children)) {
        if (!isElement(child)) continue;
        if (child.type === FRAGMENT) {
          routes.push(...fromElements(child.props.children));
          continue;
        }
        routes.push({
          path: child.props.path,
          index: Boolean(child.props.index),
          element: child.props.element === undefined ? null : child.props.element,
          children: fromElements(child.props.children),
        });
      }
      return routes;
    }

    function fromObjects(list) {
      return (list || []).map((route) => ({
        path: route.path,
        index: Boolean(route.index),
        element: route.element === undefined ? null : route.element,
        children: fromObjects(route.children),
      }));
    }

    function matchRoutes(routes, segments, params) {
      for (const route of routes) {
        if (route.index) {
          if (segments.length === 0) return [{ route, params }];
          continue;
        }
        const pattern = splitPath(route.path);
        const local = Object.assign({}, params);
        let failed = false;
        let splat = false;
        for (let i = 0; i < pattern.length; i++) {
          const part = pattern[i];
          if (part === "*") {
            local["*"] = segments.slice(i).join("/");
            splat = true;
            break;
          }
          if (i >= segments.length) {
            failed = !part.endsWith("?");
            break;
          }
          if (part.startsWith(":")) local[part.slice(1).replace(/\?$/, "")] = decodeURIComponent(segments[i]);
          else if (part.toLowerCase() !== segments[i].toLowerCase()) {
            failed = true;
            break;
          }
        }
        if (failed) continue;
        const rest = splat ? [] : segments.slice(pattern.length);
        if (route.children.length) {
          const nested = matchRoutes(route.children, rest, local);
          if (nested) return [{ route, params: local }, ...nested];
        }
        if (rest.length === 0) return [{ route, params: local }];
      }
      return null;
    }

    function Outlet() {
      const context = React.useContext(RouteContext);
      const next = context.matches[context.depth + 1];
      if (!next) return null;
      return h(
        RouteContext.Provider,
        { value: Object.assign({}, context, { depth: context.depth + 1 }) },
        next.route.element === null ? h(Outlet) : next.route.element,
      );
    }

    function renderMatches(routes, pathname) {
      const matches = matchRoutes(routes, splitPath(pathname), {});
      if (!matches) return null;
      const params = matches[matches.length - 1].params;
      const first = matches[0].route.element;
      return h(RouteContext.Provider, { value: { matches, depth: 0, params } }, first === null ? h(Outlet) : first);
    }

    function useLocation() {
      const context = React.useContext(RouterContext);
      return context ? context.location : state.location;
    }

    function Routes({ children, location }) {
      const parent = React.useContext(RouteContext);
      const current = location ? parseLocation(location) : useLocation();
      const pathname = parent.matches.length && parent.params["*"] !== undefined ? parent.params["*"] : current.pathname;
      return renderMatches(fromElements(children), pathname);
    }

    const hrefOf = (to) => (typeof to === "string" ? to : (to && to.pathname) || "/");

    function Link({ to, children, replace, state: _state, reloadDocument, ...rest }) {
      return h("a", Object.assign({}, rest, { href: hrefOf(to) }), children);
    }

    function NavLink({ to, className, style, children, end, ...rest }) {
      const location = useLocation();
      const href = hrefOf(to);
      const isActive = end
        ? location.pathname === href
        : location.pathname === href || location.pathname.startsWith(href.endsWith("/") ? href : href + "/");
      const status = { isActive, isPending: false };
      return h(
        "a",
        Object.assign({}, rest, {
          href,
          className: typeof className === "function" ? className(status) : className,
          style: typeof style === "function" ? style(status) : style,
          "aria-current": isActive ? "page" : undefined,
        }),
        typeof children === "function" ? children(status) : children,
      );
    }

    function Navigate({ to, state: navigationState }) {
      useEffect(() => navigate(to, { state: navigationState }), [hrefOf(to)]);
      return null;
    }

    function useSearchParams() {
      const location = useLocation();
      const current = new URLSearchParams(location.search);
      const update = (next) => {
        const value = typeof next === "function" ? next(current) : next;
        navigate(location.pathname + "?" + new URLSearchParams(value).toString());
      };
      return [current, update];
    }

    return {
      BrowserRouter: Router,
      HashRouter: Router,
      MemoryRouter: Router,
      Router,
      Routes,
      Route: () => null,
      Outlet,
      Link,
      NavLink,
      Navigate,
      useLocation,
      useNavigate: () => navigate,
      useParams: () => React.useContext(RouteContext).params,
      useSearchParams,
      useOutletContext: () => undefined,
      createBrowserRouter: (routes) => ({ routes }),
      createHashRouter: (routes) => ({ routes }),
      createMemoryRouter: (routes) => ({ routes }),
      RouterProvider: ({ router: data }) => renderMatches(fromObjects(data && data.routes), useLocation().pathname),
    };
  })();

  const shims = {
    "react": React,
    "react/jsx-runtime": jsxRuntime,
    "react-dom": ReactDOM,
    "react-dom/client": ReactDOM,
    "react-router-dom": router,
  };
  globalThis.React = React;

  function external(name) {
    const binding = config.externals[name];
    if (!binding) throw new Error("Unknown external module '" + name + "'");
    if (binding.type === "global") {
      const value = globalThis[binding.name];
      if (value === undefined) {
        throw new Error("External module '" + name + "' expects a global '" + binding.name + "' that is not defined");
      }
      return value;
    }
    const shim = shims[binding.name];
    if (!shim) throw new Error("No runtime shim for external module '" + name + "'");
    return shim;
  }

  // ---- module instances -------------------------------------------------
  const instances = new Map();

  function instantiate(path) {
    const existing = instances.get(path);
    if (existing) {
      if (existing.state === "failed") throw existing.error;
      // Loading (circular) or ready.
      return existing.module.exports;
    }
    const record = modules[path];
    if (!record) throw new Error("Module '" + path + "' is not part of the linked program");

    const module = { id: path, exports: {} };
    const instance = { state: "loading", module, error: null };
    instances.set(path, instance);

    const localRequire = (specifier) => {
      const target = record.targets[specifier];
      if (!target) throw new Error("Cannot find module '" + specifier + "' from " + path);
      if (target.external !== undefined) return external(target.external);
      return instantiate(target.module);
    };

    try {
      const body = vm.compileFunction(record.code, ["require", "module", "exports", "__stagehand_style"], {
        filename: path,
      });
      body.call(module.exports, localRequire, module, module.exports, registerStyle);
      instance.state = "ready";
    } catch (error) {
      instance.state = "failed";
      instance.error = error;
      if (error !== null && typeof error === "object" && !error.__stagehandPath) {
        try {
          Object.defineProperty(error, "__stagehandPath", { value: path, enumerable: false });
        } catch (_) {}
      }
      throw error;
    }
    return module.exports;
  }

  // ---- boot -------------------------------------------------------------
  setTimeout(() => {
    if (renderRequested) flush();
    emit({ type: "settled" });
    hostProcess.exit(0);
  }, config.settleMs);

  try {
    const exports = instantiate(config.entry);
    if (config.mode === "component") {
      const component =
        exports !== null && typeof exports === "object" && (exports.__esModule || exports.default !== undefined)
          ? exports.default
          : exports;
      if (isComponentType(component)) {
        rootElement = createElement(component, null);
        flush();
      } else {
        reportFault("startup", describeValue(component), config.entry);
      }
    }
  } catch (error) {
    reportError(error);
  }
}
"###;
